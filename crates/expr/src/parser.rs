// Expression parser - converts custom formula strings into an AST
// Supports: numbers, named variables, + - * /, unary +/-, parentheses,
// and calls to the whitelisted math functions (see `Function`).

use serde::Serialize;

/// Parsed expression tree. There is no node for anything but arithmetic,
/// so a parsed expression can only ever compute a number.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expr {
    Number { value: f64 },
    Variable { name: String },
    BinaryOp {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    FunctionCall {
        function: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

/// Whitelisted functions. Names are matched case-sensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    Max,
    Min,
    Abs,
    Round,
    Floor,
    Ceil,
    Sqrt,
    Pow,
}

impl Function {
    pub const ALL: [Function; 8] = [
        Function::Max,
        Function::Min,
        Function::Abs,
        Function::Round,
        Function::Floor,
        Function::Ceil,
        Function::Sqrt,
        Function::Pow,
    ];

    pub fn from_name(name: &str) -> Option<Function> {
        Function::ALL.iter().copied().find(|f| f.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Max => "max",
            Function::Min => "min",
            Function::Abs => "abs",
            Function::Round => "round",
            Function::Floor => "floor",
            Function::Ceil => "ceil",
            Function::Sqrt => "sqrt",
            Function::Pow => "pow",
        }
    }

    fn check_arity(&self, count: usize) -> Result<(), String> {
        match self {
            Function::Max | Function::Min => {
                if count == 0 {
                    return Err(format!("{} requires at least one argument", self.name()));
                }
            }
            Function::Pow => {
                if count != 2 {
                    return Err("pow requires exactly two arguments".to_string());
                }
            }
            _ => {
                if count != 1 {
                    return Err(format!("{} requires exactly one argument", self.name()));
                }
            }
        }
        Ok(())
    }
}

/// Parse an expression into an AST.
///
/// `max_depth` bounds nesting of parentheses, function calls and unary
/// operators so a hostile input cannot exhaust the stack.
pub fn parse(input: &str, max_depth: usize) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("Empty expression".to_string());
    }
    let parser = Parser { tokens: &tokens, max_depth };
    let (expr, pos) = parser.parse_add_sub(0, 0)?;
    if pos < tokens.len() {
        return Err(format!("Unexpected token at position {}", pos));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Percent,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => { chars.next(); }
            '+' => { tokens.push(Token::Plus); chars.next(); }
            '-' => { tokens.push(Token::Minus); chars.next(); }
            '*' => { tokens.push(Token::Star); chars.next(); }
            '/' => { tokens.push(Token::Slash); chars.next(); }
            '(' => { tokens.push(Token::LParen); chars.next(); }
            ')' => { tokens.push(Token::RParen); chars.next(); }
            ',' => { tokens.push(Token::Comma); chars.next(); }
            '%' => { tokens.push(Token::Percent); chars.next(); }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        num_str.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // A number running straight into letters ("2x", "1e5") is not a literal we accept
                if let Some(&(_, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        return Err(format!("Invalid number at position {}", i));
                    }
                }
                let n: f64 = num_str
                    .parse()
                    .map_err(|_| format!("Invalid number '{}' at position {}", num_str, i))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            _ => return Err(format!("Unexpected character '{}' at position {}", c, i)),
        }
    }

    Ok(tokens)
}

// ============================================================================
// Recursive descent
// ============================================================================

struct Parser<'a> {
    tokens: &'a [Token],
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn enter(&self, depth: usize) -> Result<usize, String> {
        let depth = depth + 1;
        if depth > self.max_depth {
            return Err(format!("Expression nesting exceeds {} levels", self.max_depth));
        }
        Ok(depth)
    }

    fn parse_add_sub(&self, pos: usize, depth: usize) -> Result<(Expr, usize), String> {
        let (mut left, mut pos) = self.parse_mul_div(pos, depth)?;

        while pos < self.tokens.len() {
            let op = match &self.tokens[pos] {
                Token::Plus => Op::Add,
                Token::Minus => Op::Sub,
                _ => break,
            };
            let (right, new_pos) = self.parse_mul_div(pos + 1, depth)?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
            pos = new_pos;
        }

        Ok((left, pos))
    }

    fn parse_mul_div(&self, pos: usize, depth: usize) -> Result<(Expr, usize), String> {
        let (mut left, mut pos) = self.parse_unary(pos, depth)?;

        while pos < self.tokens.len() {
            let op = match &self.tokens[pos] {
                Token::Star => Op::Mul,
                Token::Slash => Op::Div,
                Token::Percent => {
                    return Err(format!("Operator '%' is not supported (position {})", pos));
                }
                _ => break,
            };
            let (right, new_pos) = self.parse_unary(pos + 1, depth)?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
            pos = new_pos;
        }

        Ok((left, pos))
    }

    // Unary minus desugars to (0 - x)
    fn parse_unary(&self, pos: usize, depth: usize) -> Result<(Expr, usize), String> {
        match self.tokens.get(pos) {
            Some(Token::Plus) => {
                let depth = self.enter(depth)?;
                self.parse_unary(pos + 1, depth)
            }
            Some(Token::Minus) => {
                let depth = self.enter(depth)?;
                let (expr, pos) = self.parse_unary(pos + 1, depth)?;
                Ok((
                    Expr::BinaryOp {
                        op: Op::Sub,
                        left: Box::new(Expr::Number { value: 0.0 }),
                        right: Box::new(expr),
                    },
                    pos,
                ))
            }
            _ => self.parse_primary(pos, depth),
        }
    }

    fn parse_primary(&self, pos: usize, depth: usize) -> Result<(Expr, usize), String> {
        let Some(token) = self.tokens.get(pos) else {
            return Err("Unexpected end of expression".to_string());
        };

        match token {
            Token::Number(n) => Ok((Expr::Number { value: *n }, pos + 1)),
            Token::Ident(name) => {
                let is_call = matches!(self.tokens.get(pos + 1), Some(Token::LParen));
                match (Function::from_name(name), is_call) {
                    (Some(function), true) => {
                        let depth = self.enter(depth)?;
                        let (args, new_pos) = self.parse_function_args(pos + 2, depth)?;
                        function.check_arity(args.len())?;
                        Ok((Expr::FunctionCall { function, args }, new_pos))
                    }
                    (None, true) => Err(format!("Unknown function '{}'", name)),
                    (Some(function), false) => {
                        Err(format!("Function '{}' must be called with parentheses", function.name()))
                    }
                    (None, false) => Ok((Expr::Variable { name: name.clone() }, pos + 1)),
                }
            }
            Token::LParen => {
                let depth = self.enter(depth)?;
                let (expr, pos) = self.parse_add_sub(pos + 1, depth)?;
                match self.tokens.get(pos) {
                    Some(Token::RParen) => Ok((expr, pos + 1)),
                    Some(_) => Err("Expected closing parenthesis".to_string()),
                    None => Err("Missing closing parenthesis".to_string()),
                }
            }
            _ => Err(format!("Unexpected token at position {}", pos)),
        }
    }

    fn parse_function_args(&self, pos: usize, depth: usize) -> Result<(Vec<Expr>, usize), String> {
        let mut args = Vec::new();
        let mut pos = pos;

        if let Some(Token::RParen) = self.tokens.get(pos) {
            return Ok((args, pos + 1));
        }

        loop {
            let (arg, new_pos) = self.parse_add_sub(pos, depth)?;
            args.push(arg);
            pos = new_pos;

            match self.tokens.get(pos) {
                Some(Token::Comma) => pos += 1,
                Some(Token::RParen) => return Ok((args, pos + 1)),
                Some(_) => return Err("Expected ',' or ')' in function arguments".to_string()),
                None => return Err("Missing closing parenthesis".to_string()),
            }
        }
    }
}
