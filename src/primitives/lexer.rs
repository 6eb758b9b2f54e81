//! Line tokenizers and the registry that selects one per language
//!
//! A tokenizer sees one line at a time together with the state the previous line ended
//! in, so that constructs spanning lines (block comments, continued strings) are
//! classified without looking at neighbouring text. The classification rules of real
//! languages are supplied by registering more [`Tokenizer`]s; the built-ins cover plain
//! text and C-like syntax.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Token classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Text,
    Comment,
    Keyword,
    Identifier,
    Number,
    String,
    Operator,
    Punctuation,
}

/// A classified span within one line, in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub start: usize,
    pub len: usize,
    pub kind: TokenKind,
}

impl Token {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Lexer state carried from the end of one line to the start of the next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LexState {
    /// Tokenizer-defined mode; 0 is the normal mode
    pub id: u16,
    /// Nesting depth within the mode
    pub depth: u16,
}

impl LexState {
    pub const NORMAL: LexState = LexState { id: 0, depth: 0 };

    pub fn new(id: u16, depth: u16) -> Self {
        LexState { id, depth }
    }
}

/// Output of tokenizing one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTokens {
    pub tokens: Vec<Token>,
    pub end_state: LexState,
}

/// Turns one line plus an entry state into tokens and an exit state
pub trait Tokenizer: Send + Sync {
    /// Language identifier this tokenizer is registered under
    fn name(&self) -> &str;

    /// Tokenize `line` (without its terminator) starting in `entry`
    fn tokenize(&self, line: &str, entry: LexState) -> LineTokens;
}

/// Classifies every non-empty line as a single text token
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextTokenizer;

impl Tokenizer for PlainTextTokenizer {
    fn name(&self) -> &str {
        "plain"
    }

    fn tokenize(&self, line: &str, _entry: LexState) -> LineTokens {
        let len = line.chars().count();
        let tokens = if len == 0 {
            Vec::new()
        } else {
            vec![Token {
                start: 0,
                len,
                kind: TokenKind::Text,
            }]
        };
        LineTokens {
            tokens,
            end_state: LexState::NORMAL,
        }
    }
}

const BLOCK_COMMENT: u16 = 1;
const CONTINUED_STRING: u16 = 2;

/// Tokenizer for C-like syntax: `//` and `/* */` comments, quoted strings with backslash
/// line continuation, numbers, identifiers and keywords.
#[derive(Debug, Clone)]
pub struct CStyleTokenizer {
    name: String,
    keywords: HashSet<&'static str>,
    /// Whether `/*` inside a block comment opens a nested comment
    nested_comments: bool,
}

impl CStyleTokenizer {
    pub fn new(
        name: impl Into<String>,
        keywords: impl IntoIterator<Item = &'static str>,
        nested_comments: bool,
    ) -> Self {
        CStyleTokenizer {
            name: name.into(),
            keywords: keywords.into_iter().collect(),
            nested_comments,
        }
    }

    pub fn c() -> Self {
        Self::new(
            "c",
            [
                "auto", "break", "case", "char", "const", "continue", "default", "do", "double",
                "else", "enum", "extern", "float", "for", "goto", "if", "int", "long",
                "register", "return", "short", "signed", "sizeof", "static", "struct",
                "switch", "typedef", "union", "unsigned", "void", "volatile", "while",
            ],
            false,
        )
    }

    pub fn rust() -> Self {
        Self::new(
            "rust",
            [
                "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else",
                "enum", "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop",
                "match", "mod", "move", "mut", "pub", "ref", "return", "self", "Self",
                "static", "struct", "super", "trait", "true", "type", "unsafe", "use",
                "where", "while",
            ],
            true,
        )
    }

    /// Scan a block comment body starting at `i`; returns where scanning stopped and the
    /// state after it
    fn scan_comment(&self, chars: &[char], mut i: usize, mut depth: u16) -> (usize, LexState) {
        while i < chars.len() {
            if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                i += 2;
                depth -= 1;
                if depth == 0 {
                    return (i, LexState::NORMAL);
                }
            } else if self.nested_comments && chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
                i += 2;
                depth = depth.saturating_add(1);
            } else {
                i += 1;
            }
        }
        (i, LexState::new(BLOCK_COMMENT, depth))
    }

    /// Scan a string body starting at `i` (after the opening quote)
    fn scan_string(chars: &[char], mut i: usize, quote: char) -> (usize, LexState) {
        while i < chars.len() {
            match chars[i] {
                '\\' if i + 1 == chars.len() => {
                    return (chars.len(), LexState::new(CONTINUED_STRING, 0));
                }
                '\\' => i += 2,
                c if c == quote => return (i + 1, LexState::NORMAL),
                _ => i += 1,
            }
        }
        // Unterminated strings end with the line
        (chars.len(), LexState::NORMAL)
    }
}

impl Tokenizer for CStyleTokenizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn tokenize(&self, line: &str, entry: LexState) -> LineTokens {
        let chars: Vec<char> = line.chars().collect();
        let mut tokens = Vec::new();
        let mut state = entry;
        let mut i = 0;

        let mut push = |start: usize, end: usize, kind: TokenKind| {
            if end > start {
                tokens.push(Token {
                    start,
                    len: end - start,
                    kind,
                });
            }
        };

        match state.id {
            BLOCK_COMMENT => {
                let (end, next) = self.scan_comment(&chars, 0, state.depth.max(1));
                push(0, end, TokenKind::Comment);
                i = end;
                state = next;
            }
            CONTINUED_STRING => {
                let (end, next) = Self::scan_string(&chars, 0, '"');
                push(0, end, TokenKind::String);
                i = end;
                state = next;
            }
            _ => state = LexState::NORMAL,
        }

        while i < chars.len() {
            let c = chars[i];
            let start = i;
            if c.is_whitespace() {
                i += 1;
            } else if c == '/' && chars.get(i + 1) == Some(&'/') {
                push(start, chars.len(), TokenKind::Comment);
                i = chars.len();
            } else if c == '/' && chars.get(i + 1) == Some(&'*') {
                let (end, next) = self.scan_comment(&chars, i + 2, 1);
                push(start, end, TokenKind::Comment);
                i = end;
                state = next;
            } else if c == '"' || c == '\'' {
                let (end, next) = Self::scan_string(&chars, i + 1, c);
                push(start, end, TokenKind::String);
                i = end;
                state = next;
            } else if c.is_ascii_digit() {
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '.' || chars[i] == '_')
                {
                    i += 1;
                }
                push(start, i, TokenKind::Number);
            } else if c.is_alphabetic() || c == '_' {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let kind = if self.keywords.contains(word.as_str()) {
                    TokenKind::Keyword
                } else {
                    TokenKind::Identifier
                };
                push(start, i, kind);
            } else if matches!(c, '(' | ')' | '{' | '}' | '[' | ']' | ';' | ',') {
                i += 1;
                push(start, i, TokenKind::Punctuation);
            } else if c.is_ascii_punctuation() {
                i += 1;
                push(start, i, TokenKind::Operator);
            } else {
                i += 1;
                push(start, i, TokenKind::Text);
            }
        }

        LineTokens {
            tokens,
            end_state: state,
        }
    }
}

/// Tokenizers keyed by language identifier, with a file-extension lookup
#[derive(Clone)]
pub struct LexerRegistry {
    tokenizers: HashMap<String, Arc<dyn Tokenizer>>,
    extensions: HashMap<String, String>,
    fallback: Arc<dyn Tokenizer>,
}

impl std::fmt::Debug for LexerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut languages: Vec<&String> = self.tokenizers.keys().collect();
        languages.sort();
        f.debug_struct("LexerRegistry")
            .field("languages", &languages)
            .finish()
    }
}

impl Default for LexerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl LexerRegistry {
    /// A registry holding only the plain-text fallback
    pub fn empty() -> Self {
        let plain: Arc<dyn Tokenizer> = Arc::new(PlainTextTokenizer);
        let mut tokenizers = HashMap::new();
        tokenizers.insert("plain".to_string(), plain.clone());
        LexerRegistry {
            tokenizers,
            extensions: HashMap::new(),
            fallback: plain,
        }
    }

    /// Plain text, C and Rust tokenizers with their usual extensions
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(PlainTextTokenizer), &["txt", "log"]);
        registry.register(
            Arc::new(CStyleTokenizer::c()),
            &["c", "h", "cpp", "hpp", "cc", "hh", "cxx", "hxx", "java", "js", "ts", "go", "cs"],
        );
        registry.register(Arc::new(CStyleTokenizer::rust()), &["rs"]);
        registry
    }

    /// Register `tokenizer` under its name, mapping `extensions` to it. A tokenizer with
    /// the same name is replaced.
    pub fn register(&mut self, tokenizer: Arc<dyn Tokenizer>, extensions: &[&str]) {
        let name = tokenizer.name().to_string();
        for ext in extensions {
            self.extensions.insert(ext.to_ascii_lowercase(), name.clone());
        }
        tracing::debug!(language = %name, ?extensions, "registered tokenizer");
        self.tokenizers.insert(name, tokenizer);
    }

    pub fn get(&self, language: &str) -> Option<Arc<dyn Tokenizer>> {
        self.tokenizers.get(language).cloned()
    }

    /// Detect the language from the file extension; unknown extensions get plain text
    pub fn for_path(&self, path: &Path) -> Arc<dyn Tokenizer> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.extensions.get(&ext.to_ascii_lowercase()))
            .and_then(|language| self.tokenizers.get(language))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tokenizers.keys().cloned().collect();
        names.sort();
        names
    }
}
