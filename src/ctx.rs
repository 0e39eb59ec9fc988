//! Shared session context.
//!
//! Anchors the string interner, maps keywords to their token kinds, and hands
//! out the node ids that key the resolver's scope-distance table.  One
//! `Context` is threaded through lexer, parser, resolver and evaluator, and
//! persists across interactive inputs so symbols stay comparable by address.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::NodeId;
use crate::interner::{Interner, Symbol};
use crate::token::TokenKind;

#[derive(Debug)]
pub struct Context {
    interner: RefCell<Interner>,
    keywords: HashMap<Symbol, TokenKind>,
    next_id: Cell<u64>,
}

impl Context {
    /// Creates a new context.
    ///
    /// Returns a Rc because the context is shared between various data
    /// structures and across the phases of a session.
    pub fn new() -> Rc<Self> {
        let mut interner = Interner::new();

        let mut keywords = HashMap::new();
        for (name, kind) in KEYWORDS.iter() {
            keywords.insert(interner.symbol(name), *kind);
        }

        Rc::new(Context {
            interner: RefCell::new(interner),
            keywords,
            next_id: Cell::new(0),
        })
    }

    /// Interns the given string if needed and returns its associated symbol.
    pub fn symbol(&self, name: &str) -> Symbol {
        self.interner.borrow_mut().symbol(name)
    }

    /// Returns the token kind associated with the given symbol if it is a
    /// keyword.
    pub fn keyword(&self, id: &Symbol) -> Option<TokenKind> {
        self.keywords.get(id).copied()
    }

    /// Allocates a fresh node id.  Ids are unique for the whole session, so
    /// resolutions from successive interactive inputs never collide, and
    /// macro-cloned nodes can be renumbered safely.
    pub fn fresh_id(&self) -> NodeId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        NodeId(id)
    }
}

const KEYWORDS: [(&str, TokenKind); 31] = [
    ("true", TokenKind::True),
    ("false", TokenKind::False),
    ("any", TokenKind::Any),
    ("and", TokenKind::And),
    ("or", TokenKind::Or),
    ("nand", TokenKind::Nand),
    ("nor", TokenKind::Nor),
    ("implies", TokenKind::Implies),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("do", TokenKind::Do),
    ("for", TokenKind::For),
    ("switch", TokenKind::Switch),
    ("case", TokenKind::Case),
    ("default", TokenKind::Default),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("exit", TokenKind::Exit),
    ("return", TokenKind::Return),
    ("function", TokenKind::Function),
    ("class", TokenKind::Class),
    ("this", TokenKind::This),
    ("structure", TokenKind::Structure),
    ("import", TokenKind::Import),
    ("int", TokenKind::TyInt),
    ("double", TokenKind::TyDouble),
    ("char", TokenKind::TyChar),
    ("string", TokenKind::TyString),
    ("bool", TokenKind::TyBool),
    ("var", TokenKind::TyVar),
];
