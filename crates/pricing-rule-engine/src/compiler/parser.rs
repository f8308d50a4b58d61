//! 规则源码语法分析与类型检查
//!
//! 单遍完成：解析比较时已知道属性的转换类型，直接在此处校验操作符和字面量，
//! 产出可执行的条件树。遇到错误时跳到下一个 `end`（或 `rule`）继续，
//! 一次编译即可报告所有损坏的规则。

use super::lexer::{Token, TokenKind};
use crate::artifact::{Action, AttributeAccess, DatePredicate, Predicate, RuleKind};
use crate::error::{Diagnostic, Severity};
use crate::metadata::RuntimeType;
use crate::models::{AdjustmentKind, AttributeValue, DATE_FORMAT};
use crate::operators::Operator;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

type PResult<T> = std::result::Result<T, Diagnostic>;

/// 解析出的规则（尚未做跨规则检查）
#[derive(Debug, Clone)]
pub struct ParsedRule {
    pub name: String,
    pub kind: RuleKind,
    pub predicate: Predicate,
    pub action: Action,
    pub line: usize,
    pub column: usize,
}

/// 解析整个程序
pub fn parse_program(tokens: &[Token]) -> (Vec<ParsedRule>, Vec<Diagnostic>) {
    let mut parser = Parser {
        tokens,
        pos: 0,
        rule: None,
    };
    let mut rules = Vec::new();
    let mut diagnostics = Vec::new();

    while !parser.at_eof() {
        parser.rule = None;
        let start = parser.pos;
        match parser.parse_rule() {
            Ok(rule) => rules.push(rule),
            Err(diagnostic) => {
                diagnostics.push(diagnostic);
                parser.recover(start);
            }
        }
    }

    (rules, diagnostics)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    /// 当前规则名，用于诊断
    rule: Option<String>,
}

impl<'a> Parser<'a> {
    // ==================== 基础操作 ====================

    fn peek(&self) -> &'a Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_at(&self, offset: usize) -> Option<&'a TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn advance(&mut self) -> &'a Token {
        let token = self.peek();
        if !matches!(token.kind, TokenKind::Eof) {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(s) if s == keyword)
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            rule: self.rule.clone(),
            line: token.line,
            column: token.column,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        let token = self.peek();
        self.error_at(token, format!("期望 {}, 实际为 {}", expected, token.kind.describe()))
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> PResult<&'a Token> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> PResult<&'a Token> {
        if self.is_keyword(keyword) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("'{}'", keyword)))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> PResult<(&'a Token, &'a str)> {
        let token = self.peek();
        match &token.kind {
            TokenKind::Ident(s) => {
                self.advance();
                Ok((token, s.as_str()))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_str(&mut self, expected: &str) -> PResult<(&'a Token, &'a str)> {
        let token = self.peek();
        match &token.kind {
            TokenKind::Str(s) => {
                self.advance();
                Ok((token, s.as_str()))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_number(&mut self, expected: &str) -> PResult<(&'a Token, &'a str)> {
        let token = self.peek();
        match &token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok((token, n.as_str()))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_integer(&mut self, expected: &str) -> PResult<i64> {
        let (token, text) = self.expect_number(expected)?;
        text.parse::<i64>()
            .map_err(|_| self.error_at(token, format!("'{}' 不是合法的整数", text)))
    }

    fn expect_decimal(&mut self, expected: &str) -> PResult<Decimal> {
        let (token, text) = self.expect_number(expected)?;
        Decimal::from_str(text)
            .map_err(|_| self.error_at(token, format!("'{}' 不是合法的十进制数", text)))
    }

    /// 出错后跳到下一条规则
    fn recover(&mut self, start: usize) {
        // 出错位置就是规则起点时先前进一步，避免死循环
        if self.pos == start {
            self.advance();
        }
        while !self.at_eof() {
            if self.is_keyword("rule") {
                return;
            }
            if self.is_keyword("end") {
                self.advance();
                return;
            }
            self.advance();
        }
    }

    // ==================== 规则 ====================

    fn parse_rule(&mut self) -> PResult<ParsedRule> {
        let head = self.expect_keyword("rule")?;
        let (_, name) = self.expect_str("规则名")?;
        self.rule = Some(name.to_string());

        self.expect_keyword("for")?;
        let (kind_token, kind) = self.expect_ident("'component' 或 'bundle'")?;
        let kind = match kind {
            "component" => RuleKind::Component,
            "bundle" => RuleKind::Bundle,
            other => {
                return Err(self.error_at(kind_token, format!("未知的规则种类 '{}'", other)));
            }
        };

        self.expect_keyword("when")?;
        let predicate = self.parse_expr()?;

        self.expect_keyword("then")?;
        let action = self.parse_action()?;
        self.expect(TokenKind::Semicolon, "';'")?;
        self.expect_keyword("end")?;

        Ok(ParsedRule {
            name: name.to_string(),
            kind,
            predicate,
            action,
            line: head.line,
            column: head.column,
        })
    }

    fn parse_action(&mut self) -> PResult<Action> {
        let (token, name) = self.expect_ident("动作")?;
        self.expect(TokenKind::LParen, "'('")?;

        let action = match name {
            "match_tier" => {
                let component_id = self.expect_integer("组件 ID")?;
                self.expect(TokenKind::Comma, "','")?;
                let tier_id = self.expect_integer("层级 ID")?;
                self.expect(TokenKind::Comma, "','")?;
                let (_, tier_name) = self.expect_str("层级名")?;
                self.expect(TokenKind::Comma, "','")?;
                let decision_value = self.expect_decimal("决策值")?;
                Action::MatchTier {
                    component_id,
                    tier_id,
                    tier_name: tier_name.to_string(),
                    decision_value,
                }
            }
            "adjust" => {
                let (_, code) = self.expect_str("调整码")?;
                self.expect(TokenKind::Comma, "','")?;
                let (kind_token, kind) = self.expect_ident("'fixed' 或 'percent'")?;
                let kind = AdjustmentKind::from_str(kind)
                    .map_err(|e| self.error_at(kind_token, e))?;
                self.expect(TokenKind::Comma, "','")?;
                let amount = self.expect_decimal("调整金额")?;
                Action::Adjust {
                    code: code.to_string(),
                    kind,
                    amount,
                }
            }
            other => return Err(self.error_at(token, format!("未知的动作 '{}'", other))),
        };

        self.expect(TokenKind::RParen, "')'")?;
        Ok(action)
    }

    // ==================== 条件表达式 ====================

    fn parse_expr(&mut self) -> PResult<Predicate> {
        let mut parts = vec![self.parse_unary()?];
        while self.peek().kind == TokenKind::AndAnd {
            self.advance();
            parts.push(self.parse_unary()?);
        }

        if parts.len() == 1 {
            Ok(parts.remove(0))
        } else {
            Ok(Predicate::All(parts))
        }
    }

    fn parse_unary(&mut self) -> PResult<Predicate> {
        if self.peek().kind == TokenKind::Bang {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Predicate::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> PResult<Predicate> {
        if self.is_keyword("true") {
            self.advance();
            return Ok(Predicate::Always);
        }

        if self.is_keyword("targets") {
            self.advance();
            self.expect(TokenKind::LParen, "'('")?;
            let component_id = self.expect_integer("组件 ID")?;
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(Predicate::Targets(component_id));
        }

        if self.is_keyword("attr") {
            let key = self.parse_attr_key()?;
            let access = AttributeAccess {
                key,
                cast: RuntimeType::Text,
            };
            return self.parse_comparison(access);
        }

        if self.peek().kind == TokenKind::LParen {
            if self.is_cast_ahead() {
                let access = self.parse_cast_access()?;
                return self.parse_comparison(access);
            }
            self.advance();
            let inner = self.parse_expr()?;
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(inner);
        }

        Err(self.unexpected("条件"))
    }

    /// `( attr ( "key" ) as` 开头的是转换访问，否则是括号分组
    fn is_cast_ahead(&self) -> bool {
        matches!(self.peek_at(1), Some(TokenKind::Ident(s)) if s == "attr")
            && matches!(self.peek_at(2), Some(TokenKind::LParen))
            && matches!(self.peek_at(3), Some(TokenKind::Str(_)))
            && matches!(self.peek_at(4), Some(TokenKind::RParen))
            && matches!(self.peek_at(5), Some(TokenKind::Ident(s)) if s == "as")
    }

    fn parse_attr_key(&mut self) -> PResult<String> {
        self.expect_keyword("attr")?;
        self.expect(TokenKind::LParen, "'('")?;
        let (_, key) = self.expect_str("属性键")?;
        self.expect(TokenKind::RParen, "')'")?;
        Ok(key.to_string())
    }

    fn parse_cast_access(&mut self) -> PResult<AttributeAccess> {
        self.expect(TokenKind::LParen, "'('")?;
        let key = self.parse_attr_key()?;
        self.expect_keyword("as")?;

        let (path_token, first) = self.expect_ident("类型")?;
        let mut path = first.to_string();
        while self.peek().kind == TokenKind::PathSep {
            self.advance();
            let (_, segment) = self.expect_ident("类型路径")?;
            path.push_str("::");
            path.push_str(segment);
        }
        self.expect(TokenKind::RParen, "')'")?;

        let cast = RuntimeType::from_qualified_name(&path)
            .ok_or_else(|| self.error_at(path_token, format!("未知的运行时类型 '{}'", path)))?;
        Ok(AttributeAccess { key, cast })
    }

    fn parse_comparison(&mut self, access: AttributeAccess) -> PResult<Predicate> {
        let token = self.peek();
        match &token.kind {
            TokenKind::Dot => {
                self.advance();
                self.parse_method(access)
            }
            TokenKind::Op(symbol) => {
                self.advance();
                let operator = Operator::from_symbol(symbol)
                    .ok_or_else(|| self.error_at(token, format!("未知的操作符 '{}'", symbol)))?;
                match access.cast {
                    RuntimeType::Decimal => {
                        return Err(self.error_at(
                            token,
                            format!("十进制属性 '{}' 必须通过 compare_to 比较", access.key),
                        ));
                    }
                    RuntimeType::Date => {
                        return Err(self.error_at(
                            token,
                            format!(
                                "日期属性 '{}' 必须通过 is_equal / is_after / is_before 比较",
                                access.key
                            ),
                        ));
                    }
                    RuntimeType::Text | RuntimeType::Boolean if !operator.is_equality() => {
                        return Err(self.error_at(
                            token,
                            format!("{} 类型只支持 == 和 !=, 实际为 '{}'", access.cast, symbol),
                        ));
                    }
                    _ => {}
                }
                let literal = self.parse_literal(access.cast)?;
                Ok(Predicate::Compare {
                    access,
                    operator,
                    literal,
                })
            }
            TokenKind::Ident(s) if s == "in" => {
                self.advance();
                self.expect(TokenKind::LBracket, "'['")?;
                let mut literals = vec![self.parse_literal(access.cast)?];
                while self.peek().kind == TokenKind::Comma {
                    self.advance();
                    literals.push(self.parse_literal(access.cast)?);
                }
                self.expect(TokenKind::RBracket, "']'")?;
                Ok(Predicate::OneOf { access, literals })
            }
            _ => Err(self.unexpected("比较操作符、'in' 或方法调用")),
        }
    }

    fn parse_method(&mut self, access: AttributeAccess) -> PResult<Predicate> {
        let (token, method) = self.expect_ident("方法名")?;

        let date_predicate = match method {
            "compare_to" => None,
            "is_equal" => Some(DatePredicate::Equal),
            "is_after" => Some(DatePredicate::After),
            "is_before" => Some(DatePredicate::Before),
            other => return Err(self.error_at(token, format!("未知的方法 '{}'", other))),
        };

        match date_predicate {
            None => {
                if access.cast != RuntimeType::Decimal {
                    return Err(self.error_at(
                        token,
                        format!("compare_to 只能用于十进制属性, '{}' 为 {}", access.key, access.cast),
                    ));
                }
                self.expect(TokenKind::LParen, "'('")?;
                let operand = self.expect_decimal("十进制数")?;
                self.expect(TokenKind::RParen, "')'")?;

                let op_token = self.peek();
                let operator = match &op_token.kind {
                    TokenKind::Op(symbol) => {
                        self.advance();
                        Operator::from_symbol(symbol).ok_or_else(|| {
                            self.error_at(op_token, format!("未知的操作符 '{}'", symbol))
                        })?
                    }
                    _ => return Err(self.unexpected("比较操作符")),
                };

                let zero_token = self.peek();
                let zero = self.expect_integer("0")?;
                if zero != 0 {
                    return Err(self.error_at(zero_token, "compare_to 的结果只能与 0 比较"));
                }

                Ok(Predicate::DecimalOrder {
                    access,
                    operand,
                    operator,
                })
            }
            Some(predicate) => {
                if access.cast != RuntimeType::Date {
                    return Err(self.error_at(
                        token,
                        format!("{} 只能用于日期属性, '{}' 为 {}", method, access.key, access.cast),
                    ));
                }
                self.expect(TokenKind::LParen, "'('")?;
                let (date_token, raw) = self.expect_str("日期字面量")?;
                let date = NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| {
                    self.error_at(date_token, format!("'{}' 不是合法的日期 (YYYY-MM-DD)", raw))
                })?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Predicate::DateCheck {
                    access,
                    predicate,
                    date,
                })
            }
        }
    }

    /// 按转换类型解析字面量
    fn parse_literal(&mut self, cast: RuntimeType) -> PResult<AttributeValue> {
        let token = self.peek();
        let invalid = |p: &Self| {
            p.error_at(
                token,
                format!("期望 {} 字面量, 实际为 {}", cast, token.kind.describe()),
            )
        };

        let value = match (&token.kind, cast) {
            (TokenKind::Str(s), RuntimeType::Text) => AttributeValue::Text(s.clone()),
            (TokenKind::Str(s), RuntimeType::Date) => NaiveDate::parse_from_str(s, DATE_FORMAT)
                .map(AttributeValue::Date)
                .map_err(|_| invalid(&*self))?,
            (TokenKind::Number(n), RuntimeType::Integer) => n
                .parse::<i64>()
                .map(AttributeValue::Integer)
                .map_err(|_| invalid(&*self))?,
            (TokenKind::Number(n), RuntimeType::Decimal) => Decimal::from_str(n)
                .map(AttributeValue::Decimal)
                .map_err(|_| invalid(&*self))?,
            (TokenKind::Ident(s), RuntimeType::Boolean) if s == "true" || s == "false" => {
                AttributeValue::Boolean(s == "true")
            }
            _ => return Err(invalid(&*self)),
        };

        self.advance();
        Ok(value)
    }
}
