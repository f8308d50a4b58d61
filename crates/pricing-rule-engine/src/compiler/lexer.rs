//! 规则源码词法分析

/// 词法单元
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    /// 数值原文，带可选的负号和小数部分
    Number(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Dot,
    PathSep,
    AndAnd,
    Bang,
    /// 比较操作符符号
    Op(&'static str),
    /// 无法识别的输入，交给语法分析报告
    Invalid(String),
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            Self::Ident(s) => format!("'{}'", s),
            Self::Str(s) => format!("字符串 \"{}\"", s),
            Self::Number(n) => format!("数值 {}", n),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
            Self::LBracket => "'['".to_string(),
            Self::RBracket => "']'".to_string(),
            Self::Comma => "','".to_string(),
            Self::Semicolon => "';'".to_string(),
            Self::Dot => "'.'".to_string(),
            Self::PathSep => "'::'".to_string(),
            Self::AndAnd => "'&&'".to_string(),
            Self::Bang => "'!'".to_string(),
            Self::Op(op) => format!("'{}'", op),
            Self::Invalid(reason) => reason.clone(),
            Self::Eof => "文件结尾".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

/// 把源码切分为词法单元，末尾总是 Eof
pub fn tokenize(source: &str) -> Vec<Token> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut line = 1;
    let mut column = 1;

    macro_rules! push {
        ($kind:expr, $len:expr) => {{
            tokens.push(Token {
                kind: $kind,
                line,
                column,
            });
            pos += $len;
            column += $len;
        }};
    }

    while pos < chars.len() {
        let c = chars[pos];
        let next = chars.get(pos + 1).copied();

        match c {
            '\n' => {
                pos += 1;
                line += 1;
                column = 1;
            }
            c if c.is_whitespace() => {
                pos += 1;
                column += 1;
            }
            '/' if next == Some('/') => {
                while pos < chars.len() && chars[pos] != '\n' {
                    pos += 1;
                }
            }
            '(' => push!(TokenKind::LParen, 1),
            ')' => push!(TokenKind::RParen, 1),
            '[' => push!(TokenKind::LBracket, 1),
            ']' => push!(TokenKind::RBracket, 1),
            ',' => push!(TokenKind::Comma, 1),
            ';' => push!(TokenKind::Semicolon, 1),
            '.' => push!(TokenKind::Dot, 1),
            ':' if next == Some(':') => push!(TokenKind::PathSep, 2),
            '&' if next == Some('&') => push!(TokenKind::AndAnd, 2),
            '=' if next == Some('=') => push!(TokenKind::Op("=="), 2),
            '!' if next == Some('=') => push!(TokenKind::Op("!="), 2),
            '>' if next == Some('=') => push!(TokenKind::Op(">="), 2),
            '<' if next == Some('=') => push!(TokenKind::Op("<="), 2),
            '>' => push!(TokenKind::Op(">"), 1),
            '<' => push!(TokenKind::Op("<"), 1),
            '!' => push!(TokenKind::Bang, 1),
            '"' => {
                let (kind, consumed) = read_string(&chars[pos..]);
                push!(kind, consumed);
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut end = pos + 1;
                let mut seen_dot = false;
                while end < chars.len() {
                    let d = chars[end];
                    if d.is_ascii_digit() {
                        end += 1;
                    } else if d == '.'
                        && !seen_dot
                        && chars.get(end + 1).is_some_and(|n| n.is_ascii_digit())
                    {
                        seen_dot = true;
                        end += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[pos..end].iter().collect();
                push!(TokenKind::Number(text), end - pos);
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = pos + 1;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let text: String = chars[pos..end].iter().collect();
                push!(TokenKind::Ident(text), end - pos);
            }
            other => push!(TokenKind::Invalid(format!("无法识别的字符 '{}'", other)), 1),
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
        column,
    });
    tokens
}

/// 读取字符串字面量，返回词法单元和消耗的字符数
///
/// 字符串不能跨行；支持 `\"`、`\\`、`\n` 转义。
fn read_string(chars: &[char]) -> (TokenKind, usize) {
    let mut value = String::new();
    let mut i = 1;
    while i < chars.len() {
        match chars[i] {
            '"' => return (TokenKind::Str(value), i + 1),
            '\n' => break,
            '\\' => {
                match chars.get(i + 1) {
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some('n') => value.push('\n'),
                    Some(other) => {
                        return (TokenKind::Invalid(format!("未知的转义序列 '\\{}'", other)), i + 2);
                    }
                    None => break,
                }
                i += 2;
            }
            other => {
                value.push(other);
                i += 1;
            }
        }
    }
    (TokenKind::Invalid("字符串未闭合".to_string()), i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_comparison() {
        assert_eq!(
            kinds("(attr(\"amount\") as rust_decimal::Decimal).compare_to(-10.5) >= 0"),
            vec![
                TokenKind::LParen,
                TokenKind::Ident("attr".to_string()),
                TokenKind::LParen,
                TokenKind::Str("amount".to_string()),
                TokenKind::RParen,
                TokenKind::Ident("as".to_string()),
                TokenKind::Ident("rust_decimal".to_string()),
                TokenKind::PathSep,
                TokenKind::Ident("Decimal".to_string()),
                TokenKind::RParen,
                TokenKind::Dot,
                TokenKind::Ident("compare_to".to_string()),
                TokenKind::LParen,
                TokenKind::Number("-10.5".to_string()),
                TokenKind::RParen,
                TokenKind::Op(">="),
                TokenKind::Number("0".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_positions_and_comments() {
        let tokens = tokenize("// header\nrule \"a\"\n  end");
        assert_eq!(tokens[0].kind, TokenKind::Ident("rule".to_string()));
        assert_eq!((tokens[0].line, tokens[0].column), (2, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 6));
        assert_eq!((tokens[2].line, tokens[2].column), (3, 3));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""say \"hi\"""#),
            vec![TokenKind::Str("say \"hi\"".to_string()), TokenKind::Eof]
        );
        assert!(matches!(kinds("\"open")[0], TokenKind::Invalid(_)));
    }

    #[test]
    fn test_invalid_character() {
        let tokens = kinds("a $ b");
        assert!(matches!(tokens[1], TokenKind::Invalid(_)));
        assert_eq!(tokens[2], TokenKind::Ident("b".to_string()));
    }

    #[test]
    fn test_negation_and_not_equal() {
        assert_eq!(
            kinds("!(x != 1)"),
            vec![
                TokenKind::Bang,
                TokenKind::LParen,
                TokenKind::Ident("x".to_string()),
                TokenKind::Op("!="),
                TokenKind::Number("1".to_string()),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }
}
