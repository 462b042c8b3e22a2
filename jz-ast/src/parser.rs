//! Reference Pratt parser from jz source text to the s-expression AST.

use crate::lexer::{lex, Token};
use crate::node::Node;
use crate::op::Op;

/// Binding power to the right of prefix operators.
const UNARY_BP: u8 = 28;
/// Binding power of call, index, and member postfixes.
const POSTFIX_BP: u8 = 30;
/// Left/right binding powers of assignment and arrows (right-associative).
const ASSIGN_LBP: u8 = 3;
const ASSIGN_RBP: u8 = 2;
/// Left binding power of the ternary.
const TERNARY_LBP: u8 = 4;

/// Front-end failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// A character no token starts with.
    #[error("unexpected character {ch:?} at byte {pos}")]
    UnexpectedChar {
        /// The offending character.
        ch: char,
        /// Byte position in the source.
        pos: usize,
    },
    /// A malformed numeric literal.
    #[error("malformed number at byte {pos}")]
    BadNumber {
        /// Byte position in the source.
        pos: usize,
    },
    /// A string literal with no closing quote.
    #[error("unterminated string starting at byte {pos}")]
    UnterminatedString {
        /// Byte position in the source.
        pos: usize,
    },
    /// A block comment with no closing `*/`.
    #[error("unterminated comment starting at byte {pos}")]
    UnterminatedComment {
        /// Byte position in the source.
        pos: usize,
    },
    /// A token that cannot appear here.
    #[error("unexpected {found} (expected {expected})")]
    Unexpected {
        /// Rendering of the offending token.
        found: String,
        /// What the parser was looking for.
        expected: &'static str,
    },
    /// Source ended mid-construct.
    #[error("unexpected end of input (expected {expected})")]
    UnexpectedEnd {
        /// What the parser was looking for.
        expected: &'static str,
    },
}

/// Parse a whole program into a `Block` of top-level statements.
pub fn parse(src: &str) -> Result<Node, ParseError> {
    let mut parser = Parser {
        toks: lex(src)?,
        pos: 0,
    };
    parser.program()
}

struct Parser {
    toks: Vec<Token>,
    pos: usize,
}

fn render(tok: &Token) -> String {
    match tok {
        Token::Num(v) => format!("number {v}"),
        Token::Str(s) => format!("string {s:?}"),
        Token::Ident(s) => format!("`{s}`"),
        Token::Punct(p) => format!("`{p}`"),
    }
}

fn infix(p: &str) -> Option<(u8, u8, Op)> {
    Some(match p {
        "??" => (6, 7, Op::Nullish),
        "||" => (8, 9, Op::Or),
        "&&" => (10, 11, Op::And),
        "|" => (12, 13, Op::BitOr),
        "^" => (14, 15, Op::BitXor),
        "&" => (16, 17, Op::BitAnd),
        "==" => (18, 19, Op::Eq),
        "!=" => (18, 19, Op::Ne),
        "===" => (18, 19, Op::StrictEq),
        "!==" => (18, 19, Op::StrictNe),
        "<" => (20, 21, Op::Lt),
        "<=" => (20, 21, Op::Le),
        ">" => (20, 21, Op::Gt),
        ">=" => (20, 21, Op::Ge),
        "<<" => (22, 23, Op::Shl),
        ">>" => (22, 23, Op::Shr),
        ">>>" => (22, 23, Op::Ushr),
        "+" => (24, 25, Op::Add),
        "-" => (24, 25, Op::Sub),
        "*" => (26, 27, Op::Mul),
        "/" => (26, 27, Op::Div),
        "%" => (26, 27, Op::Rem),
        _ => return None,
    })
}

fn assign_op(p: &str) -> Option<Op> {
    Some(match p {
        "=" => Op::Assign,
        "+=" => Op::AddAssign,
        "-=" => Op::SubAssign,
        "*=" => Op::MulAssign,
        "/=" => Op::DivAssign,
        "%=" => Op::RemAssign,
        _ => return None,
    })
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn peek_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Some(Token::Punct(q)) if *q == p)
    }

    fn peek_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == kw)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.peek_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &'static str) -> Result<(), ParseError> {
        match self.bump() {
            Some(Token::Punct(q)) if q == p => Ok(()),
            Some(tok) => Err(ParseError::Unexpected {
                found: render(&tok),
                expected: p,
            }),
            None => Err(ParseError::UnexpectedEnd { expected: p }),
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.bump() {
            Some(Token::Ident(name)) => Ok(name),
            Some(tok) => Err(ParseError::Unexpected {
                found: render(&tok),
                expected: "identifier",
            }),
            None => Err(ParseError::UnexpectedEnd {
                expected: "identifier",
            }),
        }
    }

    fn program(&mut self) -> Result<Node, ParseError> {
        let mut stmts = Vec::new();
        while self.eat_punct(";") {}
        while self.peek().is_some() {
            stmts.push(self.stmt()?);
            while self.eat_punct(";") {}
        }
        Ok(Node::Op(Op::Block, stmts))
    }

    fn stmt(&mut self) -> Result<Node, ParseError> {
        if self.eat_kw("let") {
            return self.let_stmt();
        }
        if self.peek_kw("function") {
            return self.function(false);
        }
        if self.eat_kw("export") {
            let func = self.function(false)?;
            return Ok(Node::Op(Op::Export, vec![func]));
        }
        if self.eat_kw("return") {
            let value = if self.stmt_boundary() {
                Node::Null
            } else {
                self.expr(0)?
            };
            return Ok(Node::Op(Op::Return, vec![value]));
        }
        if self.eat_kw("if") {
            self.expect_punct("(")?;
            let cond = self.expr(0)?;
            self.expect_punct(")")?;
            let then = self.stmt()?;
            let alt = if self.eat_kw("else") {
                self.stmt()?
            } else {
                Node::Null
            };
            return Ok(Node::Op(Op::If, vec![cond, then, alt]));
        }
        if self.eat_kw("for") {
            self.expect_punct("(")?;
            let init = if self.peek_punct(";") {
                Node::Null
            } else if self.eat_kw("let") {
                self.let_stmt()?
            } else {
                self.expr(0)?
            };
            self.expect_punct(";")?;
            let cond = if self.peek_punct(";") {
                Node::Null
            } else {
                self.expr(0)?
            };
            self.expect_punct(";")?;
            let update = if self.peek_punct(")") {
                Node::Null
            } else {
                self.expr(0)?
            };
            self.expect_punct(")")?;
            let body = self.stmt()?;
            return Ok(Node::Op(Op::For, vec![init, cond, update, body]));
        }
        if self.eat_kw("while") {
            self.expect_punct("(")?;
            let cond = self.expr(0)?;
            self.expect_punct(")")?;
            let body = self.stmt()?;
            return Ok(Node::Op(Op::While, vec![cond, body]));
        }
        if self.eat_kw("do") {
            let body = self.stmt()?;
            if !self.eat_kw("while") {
                return Err(self.unexpected("while"));
            }
            self.expect_punct("(")?;
            let cond = self.expr(0)?;
            self.expect_punct(")")?;
            return Ok(Node::Op(Op::Do, vec![body, cond]));
        }
        if self.eat_kw("break") {
            return Ok(Node::Op(Op::Break, vec![]));
        }
        if self.eat_kw("continue") {
            return Ok(Node::Op(Op::Continue, vec![]));
        }
        if self.eat_kw("throw") {
            let value = self.expr(0)?;
            return Ok(Node::Op(Op::Throw, vec![value]));
        }
        if self.eat_kw("try") {
            let body = self.block()?;
            if !self.eat_kw("catch") {
                return Err(self.unexpected("catch"));
            }
            let name = if self.eat_punct("(") {
                let name = self.expect_ident()?;
                self.expect_punct(")")?;
                Node::Ident(name)
            } else {
                Node::Null
            };
            let handler = self.block()?;
            return Ok(Node::Op(Op::Try, vec![body, name, handler]));
        }
        if self.peek_punct("{") {
            return self.block();
        }
        self.expr(0)
    }

    fn stmt_boundary(&self) -> bool {
        match self.peek() {
            None => true,
            Some(Token::Punct(p)) => *p == ";" || *p == "}",
            _ => false,
        }
    }

    fn let_stmt(&mut self) -> Result<Node, ParseError> {
        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat_punct("=") {
                self.expr(ASSIGN_RBP)?
            } else {
                Node::Null
            };
            decls.push(Node::Op(Op::Let, vec![Node::Ident(name), init]));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(if decls.len() == 1 {
            decls.pop().unwrap_or(Node::Null)
        } else {
            Node::Op(Op::Block, decls)
        })
    }

    fn function(&mut self, anonymous_ok: bool) -> Result<Node, ParseError> {
        if !self.eat_kw("function") {
            return Err(self.unexpected("function"));
        }
        let name = if matches!(self.peek(), Some(Token::Ident(_))) {
            Node::Ident(self.expect_ident()?)
        } else if anonymous_ok {
            Node::Null
        } else {
            return Err(self.unexpected("function name"));
        };
        self.expect_punct("(")?;
        let params = self.params(")")?;
        let body = self.block()?;
        Ok(Node::Op(Op::Function, vec![name, params, body]))
    }

    fn block(&mut self) -> Result<Node, ParseError> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while self.eat_punct(";") {}
        while !self.peek_punct("}") {
            if self.peek().is_none() {
                return Err(ParseError::UnexpectedEnd { expected: "}" });
            }
            stmts.push(self.stmt()?);
            while self.eat_punct(";") {}
        }
        self.expect_punct("}")?;
        Ok(Node::Op(Op::Block, stmts))
    }

    /// Parameter list up to (and consuming) the closing delimiter. Items are
    /// identifiers or array-destructuring patterns.
    fn params(&mut self, close: &'static str) -> Result<Node, ParseError> {
        let mut items = Vec::new();
        if !self.eat_punct(close) {
            loop {
                items.push(self.param_item()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(close)?;
        }
        Ok(Node::args(items))
    }

    fn param_item(&mut self) -> Result<Node, ParseError> {
        if self.eat_punct("[") {
            let mut items = Vec::new();
            if !self.eat_punct("]") {
                loop {
                    items.push(self.param_item()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
            }
            return Ok(Node::Op(Op::ArrayLit, items));
        }
        Ok(Node::Ident(self.expect_ident()?))
    }

    fn expr(&mut self, min_bp: u8) -> Result<Node, ParseError> {
        let mut lhs = self.prefix()?;
        loop {
            // Postfix: call, index, member.
            if POSTFIX_BP >= min_bp {
                if self.peek_punct("(") {
                    self.pos += 1;
                    let args = self.args()?;
                    lhs = Node::Op(Op::Call, vec![lhs, args]);
                    continue;
                }
                if self.peek_punct("[") {
                    self.pos += 1;
                    let index = self.expr(0)?;
                    self.expect_punct("]")?;
                    lhs = Node::Op(Op::Index, vec![lhs, index]);
                    continue;
                }
                if self.peek_punct(".") {
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    lhs = Node::Op(Op::Member, vec![lhs, Node::Ident(name)]);
                    continue;
                }
            }
            // Single-identifier arrow: `x => body`.
            if self.peek_punct("=>") && ASSIGN_LBP >= min_bp {
                if lhs.as_ident().is_none() {
                    return Err(self.unexpected("arrow parameter"));
                }
                self.pos += 1;
                let body = self.arrow_body()?;
                lhs = Node::Op(Op::Arrow, vec![lhs, body]);
                continue;
            }
            let p = match self.peek() {
                Some(Token::Punct(p)) => *p,
                _ => break,
            };
            if let Some(op) = assign_op(p) {
                if ASSIGN_LBP < min_bp {
                    break;
                }
                self.pos += 1;
                let rhs = self.expr(ASSIGN_RBP)?;
                lhs = Node::Op(op, vec![lhs, rhs]);
                continue;
            }
            if p == "?" {
                if TERNARY_LBP < min_bp {
                    break;
                }
                self.pos += 1;
                let then = self.expr(ASSIGN_RBP)?;
                self.expect_punct(":")?;
                let alt = self.expr(TERNARY_LBP - 1)?;
                lhs = Node::Op(Op::Ternary, vec![lhs, then, alt]);
                continue;
            }
            let Some((lbp, rbp, op)) = infix(p) else {
                break;
            };
            if lbp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.expr(rbp)?;
            lhs = Node::Op(op, vec![lhs, rhs]);
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Node, ParseError> {
        let Some(tok) = self.bump() else {
            return Err(ParseError::UnexpectedEnd {
                expected: "expression",
            });
        };
        match tok {
            Token::Num(v) => Ok(Node::Num(v)),
            Token::Str(s) => Ok(Node::Str(s)),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Node::Bool(true)),
                "false" => Ok(Node::Bool(false)),
                "null" | "undefined" => Ok(Node::Null),
                "typeof" => {
                    let value = self.expr(UNARY_BP)?;
                    Ok(Node::Op(Op::Typeof, vec![value]))
                }
                "new" => {
                    let ctor = Node::Ident(self.expect_ident()?);
                    self.expect_punct("(")?;
                    let args = self.args()?;
                    Ok(Node::Op(Op::New, vec![ctor, args]))
                }
                "function" => {
                    self.pos -= 1;
                    self.function(true)
                }
                _ => Ok(Node::Ident(name)),
            },
            Token::Punct("(") => {
                if self.paren_starts_arrow() {
                    let params = self.params(")")?;
                    self.expect_punct("=>")?;
                    let body = self.arrow_body()?;
                    return Ok(Node::Op(Op::Arrow, vec![params, body]));
                }
                let inner = self.expr(0)?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Token::Punct("[") => {
                let mut items = Vec::new();
                if !self.eat_punct("]") {
                    loop {
                        items.push(self.expr(ASSIGN_RBP)?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                    self.expect_punct("]")?;
                }
                Ok(Node::Op(Op::ArrayLit, items))
            }
            Token::Punct("{") => {
                let mut pairs = Vec::new();
                if !self.eat_punct("}") {
                    loop {
                        let key = match self.bump() {
                            Some(Token::Ident(name)) => Node::Ident(name),
                            Some(Token::Str(name)) => Node::Ident(name),
                            Some(other) => {
                                return Err(ParseError::Unexpected {
                                    found: render(&other),
                                    expected: "object key",
                                })
                            }
                            None => {
                                return Err(ParseError::UnexpectedEnd {
                                    expected: "object key",
                                })
                            }
                        };
                        self.expect_punct(":")?;
                        let value = self.expr(ASSIGN_RBP)?;
                        pairs.push(key);
                        pairs.push(value);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                    self.expect_punct("}")?;
                }
                Ok(Node::Op(Op::ObjectLit, pairs))
            }
            Token::Punct("-") => {
                let value = self.expr(UNARY_BP)?;
                Ok(Node::Op(Op::Neg, vec![value]))
            }
            Token::Punct("+") => self.expr(UNARY_BP),
            Token::Punct("!") => {
                let value = self.expr(UNARY_BP)?;
                Ok(Node::Op(Op::Not, vec![value]))
            }
            Token::Punct("~") => {
                let value = self.expr(UNARY_BP)?;
                Ok(Node::Op(Op::BitNot, vec![value]))
            }
            other => Err(ParseError::Unexpected {
                found: render(&other),
                expected: "expression",
            }),
        }
    }

    fn arrow_body(&mut self) -> Result<Node, ParseError> {
        if self.peek_punct("{") {
            self.block()
        } else {
            self.expr(ASSIGN_RBP)
        }
    }

    /// Call arguments after the opening paren, consuming the closing paren.
    fn args(&mut self) -> Result<Node, ParseError> {
        let mut items = Vec::new();
        if !self.eat_punct(")") {
            loop {
                items.push(self.expr(ASSIGN_RBP)?);
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(")")?;
        }
        Ok(Node::args(items))
    }

    /// Decide whether the `(` just consumed opens an arrow parameter list:
    /// scan to the matching `)` and look for `=>`.
    fn paren_starts_arrow(&self) -> bool {
        let mut depth = 1usize;
        let mut i = self.pos;
        while let Some(tok) = self.toks.get(i) {
            match tok {
                Token::Punct("(") | Token::Punct("[") | Token::Punct("{") => depth += 1,
                Token::Punct(")") | Token::Punct("]") | Token::Punct("}") => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.toks.get(i + 1),
                            Some(Token::Punct("=>"))
                        );
                    }
                }
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        match self.peek() {
            Some(tok) => ParseError::Unexpected {
                found: render(tok),
                expected,
            },
            None => ParseError::UnexpectedEnd { expected },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_stmt(src: &str) -> Node {
        let Node::Op(Op::Block, mut stmts) = parse(src).unwrap() else {
            panic!("program is not a block");
        };
        stmts.remove(0)
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(first_stmt("1 + 2 * 3").to_string(), "(+ 1 (* 2 3))");
        assert_eq!(first_stmt("1 - 2 - 3").to_string(), "(- (- 1 2) 3)");
        assert_eq!(first_stmt("a = b = 1").to_string(), "(= a (= b 1))");
        assert_eq!(
            first_stmt("1 < 2 && 3 < 4 || x").to_string(),
            "(|| (&& (< 1 2) (< 3 4)) x)"
        );
    }

    #[test]
    fn calls_and_members_chain() {
        assert_eq!(first_stmt("f(1)(2)").to_string(), "(( (( f 1) 2)");
        assert_eq!(first_stmt("a.b[0]").to_string(), "([ (. a b) 0)");
        assert_eq!(
            first_stmt("xs.map(f)").to_string(),
            "(( (. xs map) f)"
        );
    }

    #[test]
    fn arrows() {
        assert_eq!(first_stmt("x => x + 1").to_string(), "(=> x (+ x 1))");
        assert_eq!(
            first_stmt("(a, b) => a * b").to_string(),
            "(=> (, a b) (* a b))"
        );
        assert_eq!(first_stmt("() => 0").to_string(), "(=> null 0)");
        // Curried arrows nest to the right.
        assert_eq!(
            first_stmt("a => b => a + b").to_string(),
            "(=> a (=> b (+ a b)))"
        );
    }

    #[test]
    fn destructured_arrow_params() {
        assert_eq!(
            first_stmt("([a, b]) => a + b").to_string(),
            "(=> ([] a b) (+ a b))"
        );
    }

    #[test]
    fn statements() {
        assert_eq!(
            first_stmt("for (let i = 0; i < 9; i += 1) { x = i }").to_string(),
            "(for (let i 0) (< i 9) (+= i 1) ({} (= x i)))"
        );
        assert_eq!(
            first_stmt("if (a) b; else c").to_string(),
            "(if a b c)"
        );
        assert_eq!(
            first_stmt("do { x } while (y)").to_string(),
            "(do ({} x) y)"
        );
        assert_eq!(
            first_stmt("try { f() } catch (e) { e }").to_string(),
            "(try ({} (( f null)) e ({} e))"
        );
    }

    #[test]
    fn ternary_nests_right() {
        assert_eq!(
            first_stmt("a ? 1 : b ? 2 : 3").to_string(),
            "(? a 1 (? b 2 3))"
        );
    }

    #[test]
    fn function_declarations() {
        assert_eq!(
            first_stmt("function add(a, b) { return a + b }").to_string(),
            "(function add (, a b) ({} (return (+ a b))))"
        );
        assert_eq!(
            first_stmt("export function id(x) { return x }").to_string(),
            "(export (function id x ({} (return x))))"
        );
    }

    #[test]
    fn new_typed_array() {
        assert_eq!(
            first_stmt("new F64([1, 2])").to_string(),
            "(new F64 ([] 1 2))"
        );
    }

    #[test]
    fn shift_operators() {
        assert_eq!(first_stmt("a >>> 2").to_string(), "(>>> a 2)");
        assert_eq!(first_stmt("a >> b << c").to_string(), "(<< (>> a b) c)");
    }
}
