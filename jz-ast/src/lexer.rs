use crate::parser::ParseError;

/// One lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Numeric literal.
    Num(f64),
    /// String literal, unescaped.
    Str(String),
    /// Identifier or keyword.
    Ident(String),
    /// Operator or delimiter.
    Punct(&'static str),
}

/// Multi-character operators, longest first so that prefixes never shadow.
const PUNCTS: &[&str] = &[
    "===", "!==", ">>>", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "<<",
    ">>", "+=", "-=", "*=", "/=", "%=", "(", ")", "[", "]", "{", "}", ";", ",",
    ".", "?", ":", "+", "-", "*", "/", "%", "<", ">", "=", "!", "&", "|", "^",
    "~",
];

/// Tokenize jz source text.
pub fn lex(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut toks = Vec::new();
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if src[i..].starts_with("//") {
            i += src[i..].find('\n').map_or(src.len() - i, |n| n + 1);
            continue;
        }
        if src[i..].starts_with("/*") {
            let end = src[i + 2..]
                .find("*/")
                .ok_or(ParseError::UnterminatedComment { pos: i })?;
            i += end + 4;
            continue;
        }
        if c.is_ascii_digit() {
            let (tok, next) = lex_number(src, i)?;
            toks.push(tok);
            i = next;
            continue;
        }
        if c == '"' || c == '\'' {
            let (tok, next) = lex_string(src, i)?;
            toks.push(tok);
            i = next;
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < bytes.len()
                && ((bytes[i] as char).is_ascii_alphanumeric()
                    || bytes[i] == b'_'
                    || bytes[i] == b'$')
            {
                i += 1;
            }
            toks.push(Token::Ident(src[start..i].to_string()));
            continue;
        }
        // `.` starting a member access, never a number here.
        if let Some(p) = PUNCTS.iter().find(|p| src[i..].starts_with(**p)) {
            toks.push(Token::Punct(p));
            i += p.len();
            continue;
        }
        return Err(ParseError::UnexpectedChar { ch: c, pos: i });
    }
    Ok(toks)
}

fn lex_number(src: &str, start: usize) -> Result<(Token, usize), ParseError> {
    let bytes = src.as_bytes();
    let mut i = start;
    if src[i..].starts_with("0x") || src[i..].starts_with("0X") {
        i += 2;
        let digits = i;
        while i < bytes.len() && (bytes[i] as char).is_ascii_hexdigit() {
            i += 1;
        }
        let v = u64::from_str_radix(&src[digits..i], 16)
            .map_err(|_| ParseError::BadNumber { pos: start })?;
        return Ok((Token::Num(v as f64), i));
    }
    while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len()
        && bytes[i] == b'.'
        && i + 1 < bytes.len()
        && (bytes[i + 1] as char).is_ascii_digit()
    {
        i += 1;
        while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && (bytes[j] as char).is_ascii_digit() {
            i = j;
            while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                i += 1;
            }
        }
    }
    let v = src[start..i]
        .parse::<f64>()
        .map_err(|_| ParseError::BadNumber { pos: start })?;
    Ok((Token::Num(v), i))
}

fn lex_string(src: &str, start: usize) -> Result<(Token, usize), ParseError> {
    let quote = src.as_bytes()[start] as char;
    let mut out = String::new();
    let mut chars = src[start + 1..].char_indices();
    while let Some((off, c)) = chars.next() {
        if c == quote {
            return Ok((Token::Str(out), start + 1 + off + 1));
        }
        if c == '\\' {
            let (_, esc) = chars
                .next()
                .ok_or(ParseError::UnterminatedString { pos: start })?;
            out.push(match esc {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                other => other,
            });
            continue;
        }
        out.push(c);
    }
    Err(ParseError::UnterminatedString { pos: start })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers() {
        assert_eq!(lex("1 2.5 1e3 0xff").unwrap(), [
            Token::Num(1.0),
            Token::Num(2.5),
            Token::Num(1000.0),
            Token::Num(255.0),
        ]);
    }

    #[test]
    fn longest_punct_wins() {
        assert_eq!(lex("=== => >>> >>").unwrap(), [
            Token::Punct("==="),
            Token::Punct("=>"),
            Token::Punct(">>>"),
            Token::Punct(">>"),
        ]);
    }

    #[test]
    fn member_dot_is_not_a_number() {
        assert_eq!(lex("a.b").unwrap(), [
            Token::Ident("a".into()),
            Token::Punct("."),
            Token::Ident("b".into()),
        ]);
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(lex(r#""a\nb" 'c'"#).unwrap(), [
            Token::Str("a\nb".into()),
            Token::Str("c".into()),
        ]);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(lex("1 // x\n/* y */ 2").unwrap(), [
            Token::Num(1.0),
            Token::Num(2.0),
        ]);
    }
}
