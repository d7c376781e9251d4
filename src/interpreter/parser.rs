use std::sync::Arc;

use super::ast::{
    AnalyzeDecl, BinaryOp, ComponentDecl, Decl, DistributeCase, EnumDecl, ExpectClause, Expr,
    ExprKind, File, ImportDecl, ImportItem, InstanceDecl, MethodDecl, MethodParam, Override,
    ParamDecl, Stmt, StmtKind, SwitchCase, SystemDecl, SystemItem, TypeDecl, UnaryOp, UsesDecl,
};
use super::lexer::{Punct, Token, TokenKind, tokenize};
use super::value::Value;
use super::{ParseError, Pos};

/// Parse a complete SDL file.
pub fn parse_file(name: &str, source: &str) -> Result<File, ParseError> {
    let mut parser = Parser::new(name, source)?;
    parser.file()
}

/// Parse a standalone expression (used by session commands).
pub fn parse_expr(name: &str, source: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(name, source)?;
    let expr = parser.expr()?;
    parser.eat(Punct::Semi);
    parser.expect_eof()?;
    Ok(expr)
}

/// Parse a standalone expectation such as `p99 < 100ms`.
pub fn parse_expect_clause(name: &str, source: &str) -> Result<ExpectClause, ParseError> {
    let mut parser = Parser::new(name, source)?;
    let clause = parser.expect_clause()?;
    parser.eat(Punct::Semi);
    parser.expect_eof()?;
    Ok(clause)
}

type ParseResult<T> = Result<T, ParseError>;

struct Parser {
    file: String,
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    fn new(name: &str, source: &str) -> ParseResult<Self> {
        Ok(Self {
            file: name.to_string(),
            tokens: tokenize(name, source)?,
            index: 0,
        })
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.index.min(last)]
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.index + offset).min(last)].kind
    }

    fn pos(&self) -> Pos {
        self.peek().pos
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() {
            self.index += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(&self.file, self.pos(), message)
    }

    fn describe(kind: &TokenKind) -> String {
        match kind {
            TokenKind::Ident(name) => format!("'{name}'"),
            TokenKind::Int(n) => format!("'{n}'"),
            TokenKind::Float(x) | TokenKind::Duration(x) => format!("'{x}'"),
            TokenKind::Str(text) => format!("{text:?}"),
            TokenKind::Punct(p) => format!("'{}'", p.as_str()),
            TokenKind::Eof => "end of input".to_string(),
        }
    }

    fn unexpected(&self, wanted: &str) -> ParseError {
        self.error(format!(
            "expected {wanted}, found {}",
            Self::describe(&self.peek().kind)
        ))
    }

    fn at(&self, punct: Punct) -> bool {
        self.peek().kind == TokenKind::Punct(punct)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == keyword)
    }

    fn eat(&mut self, punct: Punct) -> bool {
        if self.at(punct) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: Punct) -> ParseResult<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", punct.as_str())))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> ParseResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{keyword}'")))
        }
    }

    fn ident(&mut self) -> ParseResult<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) if !is_reserved(name) => {
                let name = name.clone();
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn expect_eof(&self) -> ParseResult<()> {
        if self.peek().kind == TokenKind::Eof {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    // ----- declarations -----

    fn file(&mut self) -> ParseResult<File> {
        let mut file = File {
            name: self.file.clone(),
            ..File::default()
        };
        loop {
            while self.eat(Punct::Semi) {}
            if self.peek().kind == TokenKind::Eof {
                return Ok(file);
            }
            let pos = self.pos();
            if self.eat_keyword("import") {
                file.imports.push(self.import(pos)?);
            } else if self.eat_keyword("enum") {
                file.decls.push(Decl::Enum(Arc::new(self.enum_decl(pos)?)));
            } else if self.eat_keyword("native") {
                self.expect_keyword("component")?;
                file.decls
                    .push(Decl::Component(Arc::new(self.component(pos, true)?)));
            } else if self.eat_keyword("component") {
                file.decls
                    .push(Decl::Component(Arc::new(self.component(pos, false)?)));
            } else if self.eat_keyword("system") {
                file.decls.push(Decl::System(Arc::new(self.system(pos)?)));
            } else {
                return Err(self.unexpected("'import', 'enum', 'component' or 'system'"));
            }
        }
    }

    fn import(&mut self, pos: Pos) -> ParseResult<ImportDecl> {
        let mut items = Vec::new();
        loop {
            let name = self.ident()?;
            let alias = if self.eat_keyword("as") {
                Some(self.ident()?)
            } else {
                None
            };
            items.push(ImportItem { name, alias });
            if !self.eat(Punct::Comma) {
                break;
            }
        }
        self.expect_keyword("from")?;
        let path = match self.bump().kind {
            TokenKind::Str(path) => path,
            _ => return Err(ParseError::new(&self.file, pos, "import path must be a string")),
        };
        self.eat(Punct::Semi);
        Ok(ImportDecl { path, items, pos })
    }

    fn enum_decl(&mut self, pos: Pos) -> ParseResult<EnumDecl> {
        let name = self.ident()?;
        self.expect(Punct::LBrace)?;
        let mut variants = Vec::new();
        while !self.eat(Punct::RBrace) {
            variants.push(self.ident()?);
            if !self.eat(Punct::Comma) {
                self.expect(Punct::RBrace)?;
                break;
            }
        }
        if variants.is_empty() {
            return Err(ParseError::new(&self.file, pos, format!("enum '{name}' has no variants")));
        }
        Ok(EnumDecl { name, variants, pos })
    }

    fn component(&mut self, pos: Pos, is_native: bool) -> ParseResult<ComponentDecl> {
        let name = self.ident()?;
        self.expect(Punct::LBrace)?;
        let mut decl = ComponentDecl {
            name,
            is_native,
            params: Vec::new(),
            uses: Vec::new(),
            methods: Vec::new(),
            pos,
        };
        loop {
            while self.eat(Punct::Semi) {}
            if self.eat(Punct::RBrace) {
                return Ok(decl);
            }
            let item_pos = self.pos();
            if self.eat_keyword("param") {
                let name = self.ident()?;
                let ty = if self.eat(Punct::Colon) {
                    Some(self.type_decl()?)
                } else {
                    None
                };
                let default = if self.eat(Punct::Assign) {
                    Some(self.expr()?.with_declared_type(ty.clone()))
                } else {
                    None
                };
                decl.params.push(ParamDecl {
                    name,
                    ty,
                    default,
                    pos: item_pos,
                });
            } else if self.eat_keyword("uses") {
                let name = self.ident()?;
                self.expect(Punct::Colon)?;
                let component = self.ident()?;
                decl.uses.push(UsesDecl {
                    name,
                    component,
                    pos: item_pos,
                });
            } else if self.eat_keyword("method") {
                decl.methods.push(self.method(item_pos)?);
            } else {
                return Err(self.unexpected("'param', 'uses', 'method' or '}'"));
            }
        }
    }

    fn method(&mut self, pos: Pos) -> ParseResult<MethodDecl> {
        let name = self.ident()?;
        self.expect(Punct::LParen)?;
        let mut params = Vec::new();
        while !self.eat(Punct::RParen) {
            let param = self.ident()?;
            self.expect(Punct::Colon)?;
            let ty = self.type_decl()?;
            params.push(MethodParam { name: param, ty });
            if !self.eat(Punct::Comma) {
                self.expect(Punct::RParen)?;
                break;
            }
        }
        let returns = if self.eat(Punct::Colon) {
            Some(self.type_decl()?)
        } else {
            None
        };
        let body = if self.at(Punct::LBrace) {
            Some(self.block()?)
        } else {
            self.eat(Punct::Semi);
            None
        };
        Ok(MethodDecl {
            name,
            params,
            returns,
            body,
            pos,
        })
    }

    fn type_decl(&mut self) -> ParseResult<TypeDecl> {
        let pos = self.pos();
        let name = self.ident()?;
        let mut args = Vec::new();
        if self.eat(Punct::LBracket) {
            loop {
                args.push(self.type_decl()?);
                if !self.eat(Punct::Comma) {
                    break;
                }
            }
            self.expect(Punct::RBracket)?;
        }
        Ok(TypeDecl { name, args, pos })
    }

    fn system(&mut self, pos: Pos) -> ParseResult<SystemDecl> {
        let name = self.ident()?;
        self.expect(Punct::LBrace)?;
        let mut items = Vec::new();
        loop {
            while self.eat(Punct::Semi) {}
            if self.eat(Punct::RBrace) {
                return Ok(SystemDecl { name, items, pos });
            }
            let item_pos = self.pos();
            if self.eat_keyword("instance") {
                items.push(SystemItem::Instance(self.instance(item_pos)?));
            } else if self.eat_keyword("let") {
                let name = self.ident()?;
                self.expect(Punct::Assign)?;
                let value = self.expr()?;
                items.push(SystemItem::Let {
                    name,
                    value,
                    pos: item_pos,
                });
            } else if self.eat_keyword("analyze") {
                items.push(SystemItem::Analyze(self.analyze(item_pos)?));
            } else {
                return Err(self.unexpected("'instance', 'let', 'analyze' or '}'"));
            }
        }
    }

    fn instance(&mut self, pos: Pos) -> ParseResult<InstanceDecl> {
        let name = self.ident()?;
        self.expect(Punct::Colon)?;
        let component = self.ident()?;
        let mut overrides = Vec::new();
        if self.eat(Punct::Assign) {
            self.expect(Punct::LBrace)?;
            loop {
                while self.eat(Punct::Semi) || self.eat(Punct::Comma) {}
                if self.eat(Punct::RBrace) {
                    break;
                }
                let item_pos = self.pos();
                let target = self.ident()?;
                self.expect(Punct::Assign)?;
                let value = self.expr()?;
                overrides.push(Override {
                    name: target,
                    value,
                    pos: item_pos,
                });
            }
        }
        Ok(InstanceDecl {
            name,
            component,
            overrides,
            pos,
        })
    }

    fn analyze(&mut self, pos: Pos) -> ParseResult<AnalyzeDecl> {
        let name = self.ident()?;
        self.expect(Punct::Assign)?;
        let target = self.expr()?;
        let mut expectations = Vec::new();
        if self.eat_keyword("expect") {
            self.expect(Punct::LBrace)?;
            loop {
                while self.eat(Punct::Semi) || self.eat(Punct::Comma) {}
                if self.eat(Punct::RBrace) {
                    break;
                }
                expectations.push(self.expect_clause()?);
            }
        }
        Ok(AnalyzeDecl {
            name,
            target,
            expectations,
            pos,
        })
    }

    fn expect_clause(&mut self) -> ParseResult<ExpectClause> {
        let pos = self.pos();
        let first = self.ident()?;
        let (subject, metric) = if self.eat(Punct::Dot) {
            (Some(first), self.ident()?)
        } else {
            (None, first)
        };
        let op = match self.peek().kind {
            TokenKind::Punct(p) => comparison_op(p),
            _ => None,
        }
        .ok_or_else(|| self.unexpected("comparison operator"))?;
        self.bump();
        let threshold = self.additive()?;
        Ok(ExpectClause {
            subject,
            metric,
            op,
            threshold,
            pos,
        })
    }

    // ----- statements -----

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(Punct::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            while self.eat(Punct::Semi) {}
            if self.eat(Punct::RBrace) {
                return Ok(stmts);
            }
            if self.peek().kind == TokenKind::Eof {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.stmt()?);
        }
    }

    fn stmt(&mut self) -> ParseResult<Stmt> {
        let pos = self.pos();
        let kind = if self.at(Punct::LBrace) {
            StmtKind::Block(self.block()?)
        } else if self.eat_keyword("let") {
            let name = self.ident()?;
            let ty = if self.eat(Punct::Colon) {
                Some(self.type_decl()?)
            } else {
                None
            };
            self.expect(Punct::Assign)?;
            let value = self.expr()?.with_declared_type(ty);
            StmtKind::Let { name, value }
        } else if self.eat_keyword("set") {
            let name = self.ident()?;
            self.expect(Punct::Assign)?;
            StmtKind::Set {
                name,
                value: self.expr()?,
            }
        } else if self.eat_keyword("return") {
            if self.at(Punct::Semi) || self.at(Punct::RBrace) {
                StmtKind::Return(None)
            } else {
                StmtKind::Return(Some(self.expr()?))
            }
        } else if self.eat_keyword("if") {
            self.if_stmt()?
        } else if self.eat_keyword("for") {
            let count = self.expr()?;
            StmtKind::For {
                count,
                body: self.block()?,
            }
        } else if self.eat_keyword("switch") {
            self.switch_stmt()?
        } else if self.eat_keyword("delay") {
            StmtKind::Delay(self.expr()?)
        } else if self.eat_keyword("go") {
            let name = self.ident()?;
            let body = if self.at(Punct::LBrace) {
                let body_pos = self.pos();
                Expr::new(ExprKind::Block(self.block()?), body_pos)
            } else {
                self.expect(Punct::Assign)?;
                self.expr()?
            };
            StmtKind::Go { name, body }
        } else if self.eat_keyword("wait") {
            let mut names = vec![self.ident()?];
            while self.eat(Punct::Comma) {
                names.push(self.ident()?);
            }
            let aggregator = if self.eat_keyword("using") {
                Some(self.ident()?)
            } else {
                None
            };
            StmtKind::Wait { names, aggregator }
        } else if self.eat_keyword("log") {
            let mut args = vec![self.expr()?];
            while self.eat(Punct::Comma) {
                args.push(self.expr()?);
            }
            StmtKind::Log(args)
        } else if matches!(self.peek_at(0), TokenKind::Ident(name) if !is_reserved(name))
            && *self.peek_at(1) == TokenKind::Punct(Punct::Assign)
        {
            let name = self.ident()?;
            self.bump();
            StmtKind::Set {
                name,
                value: self.expr()?,
            }
        } else {
            StmtKind::Expr(self.expr()?)
        };
        self.eat(Punct::Semi);
        Ok(Stmt { kind, pos })
    }

    fn if_stmt(&mut self) -> ParseResult<StmtKind> {
        let condition = self.expr()?;
        let then_branch = self.block()?;
        let else_branch = if self.eat_keyword("else") {
            if self.at_keyword("if") {
                let pos = self.pos();
                self.bump();
                Some(vec![Stmt {
                    kind: self.if_stmt()?,
                    pos,
                }])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(StmtKind::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn switch_stmt(&mut self) -> ParseResult<StmtKind> {
        let subject = self.expr()?;
        self.expect(Punct::LBrace)?;
        let mut cases = Vec::new();
        let mut default = None;
        loop {
            while self.eat(Punct::Semi) || self.eat(Punct::Comma) {}
            if self.eat(Punct::RBrace) {
                break;
            }
            if self.eat_keyword("default") {
                self.expect(Punct::Arrow)?;
                default = Some(self.case_body()?);
            } else {
                self.expect_keyword("case")?;
                let value = self.expr()?;
                self.expect(Punct::Arrow)?;
                cases.push(SwitchCase {
                    value,
                    body: self.case_body()?,
                });
            }
        }
        Ok(StmtKind::Switch {
            subject,
            cases,
            default,
        })
    }

    fn case_body(&mut self) -> ParseResult<Vec<Stmt>> {
        if self.at(Punct::LBrace) {
            self.block()
        } else {
            Ok(vec![self.stmt()?])
        }
    }

    // ----- expressions -----

    fn expr(&mut self) -> ParseResult<Expr> {
        self.or()
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> ParseResult<Expr>,
        table: &[(Punct, BinaryOp)],
    ) -> ParseResult<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (punct, op) in table {
                if self.at(*punct) {
                    let pos = self.pos();
                    self.bump();
                    let right = next(self)?;
                    left = Expr::new(
                        ExprKind::Binary {
                            op: *op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        pos,
                    );
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn or(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::and, &[(Punct::OrOr, BinaryOp::Or)])
    }

    fn and(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::equality, &[(Punct::AndAnd, BinaryOp::And)])
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            Self::comparison,
            &[(Punct::EqEq, BinaryOp::Eq), (Punct::NotEq, BinaryOp::Ne)],
        )
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            Self::additive,
            &[
                (Punct::Le, BinaryOp::Le),
                (Punct::Ge, BinaryOp::Ge),
                (Punct::Lt, BinaryOp::Lt),
                (Punct::Gt, BinaryOp::Gt),
            ],
        )
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            Self::multiplicative,
            &[(Punct::Plus, BinaryOp::Add), (Punct::Minus, BinaryOp::Sub)],
        )
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            Self::unary,
            &[
                (Punct::Star, BinaryOp::Mul),
                (Punct::Slash, BinaryOp::Div),
                (Punct::Percent, BinaryOp::Mod),
            ],
        )
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let pos = self.pos();
        let op = if self.eat(Punct::Bang) {
            UnaryOp::Not
        } else if self.eat(Punct::Minus) {
            UnaryOp::Neg
        } else {
            return self.postfix();
        };
        let operand = self.unary()?;
        // Fold negative literals so `-1` stays a literal.
        if op == UnaryOp::Neg {
            if let ExprKind::Literal(value) = &operand.kind {
                match value {
                    Value::Int(n) => return Ok(Expr::new(ExprKind::Literal(Value::Int(-n)), pos)),
                    Value::Float(x) => {
                        return Ok(Expr::new(ExprKind::Literal(Value::Float(-x)), pos));
                    }
                    _ => {}
                }
            }
        }
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            pos,
        ))
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            let pos = self.pos();
            if self.eat(Punct::Dot) {
                let field = match self.bump().kind {
                    TokenKind::Ident(name) => name,
                    _ => return Err(ParseError::new(&self.file, pos, "expected member name after '.'")),
                };
                expr = Expr::new(
                    ExprKind::Member {
                        receiver: Box::new(expr),
                        field,
                    },
                    pos,
                );
            } else if self.eat(Punct::LParen) {
                let mut args = Vec::new();
                while !self.eat(Punct::RParen) {
                    args.push(self.expr()?);
                    if !self.eat(Punct::Comma) {
                        self.expect(Punct::RParen)?;
                        break;
                    }
                }
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    pos,
                );
            } else if self.eat(Punct::LBracket) {
                let index = self.expr()?;
                self.expect(Punct::RBracket)?;
                expr = Expr::new(
                    ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                    pos,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let pos = self.pos();
        let token = self.peek().kind.clone();
        let kind = match token {
            TokenKind::Int(n) => {
                self.bump();
                ExprKind::Literal(Value::Int(n))
            }
            TokenKind::Float(x) | TokenKind::Duration(x) => {
                self.bump();
                ExprKind::Literal(Value::Float(x))
            }
            TokenKind::Str(text) => {
                self.bump();
                ExprKind::Literal(Value::Str(text))
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" | "false" => {
                    self.bump();
                    ExprKind::Literal(Value::Bool(name == "true"))
                }
                "distribute" => {
                    self.bump();
                    return self.distribute(pos);
                }
                "sample" => {
                    self.bump();
                    self.eat_keyword("from");
                    ExprKind::Sample(Box::new(self.unary()?))
                }
                _ => ExprKind::Ident(self.ident()?),
            },
            TokenKind::Punct(Punct::LParen) => {
                self.bump();
                let first = self.expr()?;
                if self.eat(Punct::RParen) {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat(Punct::Comma) {
                    if self.at(Punct::RParen) {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect(Punct::RParen)?;
                ExprKind::Tuple(items)
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.bump();
                let mut items = Vec::new();
                while !self.eat(Punct::RBracket) {
                    items.push(self.expr()?);
                    if !self.eat(Punct::Comma) {
                        self.expect(Punct::RBracket)?;
                        break;
                    }
                }
                ExprKind::List(items)
            }
            TokenKind::Punct(Punct::LBrace) => ExprKind::Block(self.block()?),
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr::new(kind, pos))
    }

    fn distribute(&mut self, pos: Pos) -> ParseResult<Expr> {
        let total = if self.at(Punct::LBrace) {
            None
        } else {
            Some(Box::new(self.additive()?))
        };
        self.expect(Punct::LBrace)?;
        let mut cases = Vec::new();
        let mut default = None;
        loop {
            while self.eat(Punct::Semi) || self.eat(Punct::Comma) {}
            if self.eat(Punct::RBrace) {
                break;
            }
            if self.eat_keyword("default") {
                self.expect(Punct::Arrow)?;
                default = Some(Box::new(self.expr()?));
            } else {
                let weight = self.expr()?;
                self.expect(Punct::Arrow)?;
                let body = self.expr()?;
                cases.push(DistributeCase { weight, body });
            }
        }
        Ok(Expr::new(
            ExprKind::Distribute {
                total,
                cases,
                default,
            },
            pos,
        ))
    }
}

fn comparison_op(punct: Punct) -> Option<BinaryOp> {
    match punct {
        Punct::Lt => Some(BinaryOp::Lt),
        Punct::Le => Some(BinaryOp::Le),
        Punct::Gt => Some(BinaryOp::Gt),
        Punct::Ge => Some(BinaryOp::Ge),
        Punct::EqEq => Some(BinaryOp::Eq),
        Punct::NotEq => Some(BinaryOp::Ne),
        _ => None,
    }
}

fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "let"
            | "set"
            | "return"
            | "if"
            | "else"
            | "for"
            | "switch"
            | "case"
            | "default"
            | "delay"
            | "go"
            | "wait"
            | "log"
            | "distribute"
            | "sample"
            | "true"
            | "false"
            | "import"
            | "component"
            | "native"
            | "system"
            | "param"
            | "uses"
            | "method"
            | "instance"
            | "analyze"
            | "expect"
            | "enum"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISK: &str = r#"
        component Disk {
            param FailureProb: float = 0.01
            param ReadLatency: duration = 10ms
            method Read(): bool {
                distribute {
                    FailureProb => { delay 10s; return false }
                    default => { delay ReadLatency; return true }
                }
            }
        }

        system Demo {
            instance disk: Disk
            analyze read = disk.Read() expect {
                read.availability >= 0.98;
                p50 < 20ms
            }
        }
    "#;

    #[test]
    fn parses_component_and_system() {
        let file = parse_file("disk.sdl", DISK).expect("parse");
        assert_eq!(file.decls.len(), 2);
        let Decl::Component(disk) = &file.decls[0] else {
            panic!("expected component");
        };
        assert_eq!(disk.params.len(), 2);
        assert_eq!(disk.params[1].ty.as_ref().map(|t| t.name.as_str()), Some("duration"));
        let read = disk.method("Read").expect("method");
        assert_eq!(read.returns.as_ref().map(|t| t.name.as_str()), Some("bool"));
        assert_eq!(read.body.as_ref().map(Vec::len), Some(1));

        let Decl::System(system) = &file.decls[1] else {
            panic!("expected system");
        };
        let analysis = system.analyses().next().expect("analysis");
        assert_eq!(analysis.expectations.len(), 2);
        assert_eq!(analysis.expectations[0].subject.as_deref(), Some("read"));
        assert_eq!(analysis.expectations[1].op, BinaryOp::Lt);
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let expr = parse_expr("t", "1 + 2 * 3 < 10 && !x").unwrap();
        let ExprKind::Binary { op, left, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::And);
        let ExprKind::Binary { op, left: sum, .. } = &left.kind else {
            panic!("expected comparison");
        };
        assert_eq!(*op, BinaryOp::Lt);
        let ExprKind::Binary { op, right, .. } = &sum.kind else {
            panic!("expected sum");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn statements_parse_with_optional_semicolons() {
        let src = r#"
            component C {
                uses d: Disk
                method Both(): bool {
                    go a = d.Read()
                    go b { delay 1ms }
                    wait a, b using WaitAll
                    let n: int = 3;
                    n = n - 1
                    for n { log "tick", n }
                    switch n { case 1 => return false; default => { return true } }
                }
            }
        "#;
        let file = parse_file("c.sdl", src).expect("parse");
        let Decl::Component(c) = &file.decls[0] else {
            panic!("expected component");
        };
        let body = c.methods[0].body.as_ref().unwrap();
        assert_eq!(body.len(), 7);
        assert!(matches!(&body[2].kind, StmtKind::Wait { aggregator: Some(a), .. } if a == "WaitAll"));
        assert!(matches!(&body[4].kind, StmtKind::Set { name, .. } if name == "n"));
    }

    #[test]
    fn errors_carry_positions() {
        let err = parse_file("bad.sdl", "component X {\n  param = 3\n}").unwrap_err();
        assert_eq!(err.pos, Pos::new(2, 9));
        assert!(err.to_string().starts_with("bad.sdl:2:9"));
    }

    #[test]
    fn imports_and_enums() {
        let file = parse_file(
            "m.sdl",
            r#"import Disk, Cache as C from "lib.sdl"; enum Status { Ok, Busy, }"#,
        )
        .unwrap();
        assert_eq!(file.imports[0].items[1].local_name(), "C");
        let Decl::Enum(status) = &file.decls[0] else {
            panic!("expected enum");
        };
        assert_eq!(status.variants, vec!["Ok", "Busy"]);
    }
}
