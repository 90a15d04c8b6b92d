//! Recursive-descent parser for the supported regex subset.
//!
//! Supported: literals, `.`, classes with ranges and negation, the usual
//! escapes (`\d \D \w \W \s \S`, control escapes, `\xHH`, `\uHHHH`,
//! `\u{...}`, identity escapes), anchors, groups, alternation, and the
//! quantifiers `* + ? {n} {n,} {n,m}` with lazy `?` variants. Capturing
//! semantics, backreferences, and lookaround are out: the engine reports
//! match/no-match only.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected end of pattern")]
    UnexpectedEnd,

    #[error("unbalanced parenthesis at {0}")]
    UnbalancedParen(usize),

    #[error("invalid escape '\\{0}' at {1}")]
    InvalidEscape(char, usize),

    #[error("invalid character class at {0}")]
    InvalidClass(usize),

    #[error("class range out of order at {0}")]
    RangeOutOfOrder(usize),

    #[error("quantifier without a target at {0}")]
    DanglingQuantifier(usize),

    #[error("quantifier bounds out of order at {0}")]
    QuantifierOutOfOrder(usize),

    #[error("unsupported construct '{0}' at {1}")]
    Unsupported(&'static str, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    Empty,
    /// A literal scalar value.
    Char(u32),
    Class(CharClass),
    Dot,
    StartAnchor,
    EndAnchor,
    Concat(Vec<Ast>),
    Alternate(Vec<Ast>),
    Repeat {
        node: Box<Ast>,
        min: u32,
        max: Option<u32>,
        greedy: bool,
    },
    Group(Box<Ast>),
}

impl Ast {
    /// Can this node match the empty string?
    pub fn is_nullable(&self) -> bool {
        match self {
            Ast::Empty | Ast::StartAnchor | Ast::EndAnchor => true,
            Ast::Char(_) | Ast::Class(_) | Ast::Dot => false,
            Ast::Concat(nodes) => nodes.iter().all(Ast::is_nullable),
            Ast::Alternate(nodes) => nodes.iter().any(Ast::is_nullable),
            Ast::Repeat { node, min, .. } => *min == 0 || node.is_nullable(),
            Ast::Group(inner) => inner.is_nullable(),
        }
    }
}

/// Inclusive scalar ranges; `negated` complements the union.
#[derive(Debug, Clone, PartialEq)]
pub struct CharClass {
    pub ranges: Vec<(u32, u32)>,
    pub negated: bool,
}

impl CharClass {
    fn single(c: u32) -> Self {
        Self {
            ranges: vec![(c, c)],
            negated: false,
        }
    }

    /// Sort and merge overlapping or adjacent ranges.
    pub fn normalize(&mut self) {
        self.ranges.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(self.ranges.len());
        for &(from, to) in &self.ranges {
            match merged.last_mut() {
                Some(last) if from <= last.1.saturating_add(1) => last.1 = last.1.max(to),
                _ => merged.push((from, to)),
            }
        }
        self.ranges = merged;
    }
}

fn digit_class() -> Vec<(u32, u32)> {
    vec![(0x30, 0x39)]
}

fn word_class() -> Vec<(u32, u32)> {
    vec![(0x30, 0x39), (0x41, 0x5a), (0x5f, 0x5f), (0x61, 0x7a)]
}

fn space_class() -> Vec<(u32, u32)> {
    vec![
        (0x09, 0x0d),
        (0x20, 0x20),
        (0xa0, 0xa0),
        (0x1680, 0x1680),
        (0x2000, 0x200a),
        (0x2028, 0x2029),
        (0x202f, 0x202f),
        (0x205f, 0x205f),
        (0x3000, 0x3000),
        (0xfeff, 0xfeff),
    ]
}

pub fn parse(pattern: &str) -> Result<Ast, ParseError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut p = Parser { chars, pos: 0 };
    let ast = p.alternation()?;
    if p.pos != p.chars.len() {
        // The only way to stop early is an unmatched ')'.
        return Err(ParseError::UnbalancedParen(p.pos));
    }
    Ok(ast)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, want: char) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn alternation(&mut self) -> Result<Ast, ParseError> {
        let mut branches = vec![self.concat()?];
        while self.eat('|') {
            branches.push(self.concat()?);
        }
        Ok(if branches.len() == 1 {
            branches.pop().expect("one branch")
        } else {
            Ast::Alternate(branches)
        })
    }

    fn concat(&mut self) -> Result<Ast, ParseError> {
        let mut nodes = Vec::new();
        while let Some(c) = self.peek() {
            if c == '|' || c == ')' {
                break;
            }
            nodes.push(self.repeat()?);
        }
        Ok(match nodes.len() {
            0 => Ast::Empty,
            1 => nodes.pop().expect("one node"),
            _ => Ast::Concat(nodes),
        })
    }

    fn repeat(&mut self) -> Result<Ast, ParseError> {
        let atom = self.atom()?;
        let at = self.pos;
        let bounds = match self.peek() {
            Some('*') => {
                self.pos += 1;
                Some((0, None))
            }
            Some('+') => {
                self.pos += 1;
                Some((1, None))
            }
            Some('?') => {
                self.pos += 1;
                Some((0, Some(1)))
            }
            Some('{') => self.try_counted()?,
            _ => None,
        };
        let Some((min, max)) = bounds else {
            return Ok(atom);
        };
        if matches!(atom, Ast::StartAnchor | Ast::EndAnchor) {
            return Err(ParseError::DanglingQuantifier(at));
        }
        if let Some(max) = max {
            if max < min {
                return Err(ParseError::QuantifierOutOfOrder(at));
            }
        }
        let greedy = !self.eat('?');
        Ok(Ast::Repeat {
            node: Box::new(atom),
            min,
            max,
            greedy,
        })
    }

    /// Parse `{n}`, `{n,}`, or `{n,m}`. A brace that doesn't open a valid
    /// quantifier is left in place to be taken as a literal.
    fn try_counted(&mut self) -> Result<Option<(u32, Option<u32>)>, ParseError> {
        let start = self.pos;
        self.pos += 1; // '{'
        let min = match self.number() {
            Some(n) => n,
            None => {
                self.pos = start;
                return Ok(None);
            }
        };
        if self.eat('}') {
            return Ok(Some((min, Some(min))));
        }
        if !self.eat(',') {
            self.pos = start;
            return Ok(None);
        }
        if self.eat('}') {
            return Ok(Some((min, None)));
        }
        let max = match self.number() {
            Some(n) => n,
            None => {
                self.pos = start;
                return Ok(None);
            }
        };
        if self.eat('}') {
            return Ok(Some((min, Some(max))));
        }
        self.pos = start;
        Ok(None)
    }

    fn number(&mut self) -> Option<u32> {
        let mut value: u32 = 0;
        let mut any = false;
        while let Some(c) = self.peek() {
            let Some(d) = c.to_digit(10) else { break };
            value = value.saturating_mul(10).saturating_add(d);
            any = true;
            self.pos += 1;
        }
        any.then_some(value)
    }

    fn atom(&mut self) -> Result<Ast, ParseError> {
        let at = self.pos;
        match self.bump().ok_or(ParseError::UnexpectedEnd)? {
            '(' => {
                if self.eat('?') {
                    match self.peek() {
                        Some(':') => {
                            self.pos += 1;
                        }
                        Some('=') | Some('!') => {
                            return Err(ParseError::Unsupported("lookaround", at))
                        }
                        Some('<') => return Err(ParseError::Unsupported("named group", at)),
                        _ => return Err(ParseError::Unsupported("group modifier", at)),
                    }
                }
                let inner = self.alternation()?;
                if !self.eat(')') {
                    return Err(ParseError::UnbalancedParen(at));
                }
                Ok(Ast::Group(Box::new(inner)))
            }
            ')' => {
                self.pos = at;
                Err(ParseError::UnbalancedParen(at))
            }
            '[' => self.class(at),
            '.' => Ok(Ast::Dot),
            '^' => Ok(Ast::StartAnchor),
            '$' => Ok(Ast::EndAnchor),
            '*' | '+' | '?' => Err(ParseError::DanglingQuantifier(at)),
            '\\' => self.escape(at).map(|esc| match esc {
                Escape::Char(c) => Ast::Char(c),
                Escape::Class(ranges, negated) => Ast::Class(CharClass { ranges, negated }),
            }),
            c => Ok(Ast::Char(c as u32)),
        }
    }

    fn class(&mut self, at: usize) -> Result<Ast, ParseError> {
        let negated = self.eat('^');
        let mut class = CharClass {
            ranges: Vec::new(),
            negated,
        };
        loop {
            let item_at = self.pos;
            let lo = match self.bump().ok_or(ParseError::InvalidClass(at))? {
                // "[]" matches nothing and "[^]" everything; both are valid.
                ']' => {
                    class.normalize();
                    return Ok(Ast::Class(class));
                }
                '\\' => match self.escape(item_at)? {
                    Escape::Char(c) => c,
                    Escape::Class(mut ranges, neg) => {
                        if neg {
                            return Err(ParseError::Unsupported(
                                "negated class escape inside class",
                                item_at,
                            ));
                        }
                        class.ranges.append(&mut ranges);
                        continue;
                    }
                },
                c => c as u32,
            };

            // A '-' followed by anything but ']' makes a range.
            if self.peek() == Some('-') && self.chars.get(self.pos + 1) != Some(&']') {
                self.pos += 1; // '-'
                let hi_at = self.pos;
                let hi = match self.bump().ok_or(ParseError::InvalidClass(at))? {
                    '\\' => match self.escape(hi_at)? {
                        Escape::Char(c) => c,
                        Escape::Class(..) => {
                            return Err(ParseError::Unsupported("class escape in range", hi_at))
                        }
                    },
                    c => c as u32,
                };
                if hi < lo {
                    return Err(ParseError::RangeOutOfOrder(item_at));
                }
                class.ranges.push((lo, hi));
            } else {
                class.ranges.push((lo, lo));
            }
        }
    }

    fn escape(&mut self, at: usize) -> Result<Escape, ParseError> {
        let c = self.bump().ok_or(ParseError::UnexpectedEnd)?;
        Ok(match c {
            'd' => Escape::Class(digit_class(), false),
            'D' => Escape::Class(digit_class(), true),
            'w' => Escape::Class(word_class(), false),
            'W' => Escape::Class(word_class(), true),
            's' => Escape::Class(space_class(), false),
            'S' => Escape::Class(space_class(), true),
            'n' => Escape::Char(0x0a),
            'r' => Escape::Char(0x0d),
            't' => Escape::Char(0x09),
            'f' => Escape::Char(0x0c),
            'v' => Escape::Char(0x0b),
            '0' => Escape::Char(0),
            'b' | 'B' => return Err(ParseError::Unsupported("word boundary", at)),
            '1'..='9' => return Err(ParseError::Unsupported("backreference", at)),
            'x' => Escape::Char(self.hex_digits(2, at)?),
            'u' => {
                if self.eat('{') {
                    let mut value = 0u32;
                    let mut any = false;
                    while let Some(c) = self.peek() {
                        let Some(d) = c.to_digit(16) else { break };
                        value = value.saturating_mul(16).saturating_add(d);
                        any = true;
                        self.pos += 1;
                    }
                    if !any || !self.eat('}') || value > 0x10ffff {
                        return Err(ParseError::InvalidEscape('u', at));
                    }
                    Escape::Char(value)
                } else {
                    Escape::Char(self.hex_digits(4, at)?)
                }
            }
            // Identity escape for punctuation and anything non-alphanumeric.
            c if !c.is_alphanumeric() => Escape::Char(c as u32),
            c => return Err(ParseError::InvalidEscape(c, at)),
        })
    }

    fn hex_digits(&mut self, n: usize, at: usize) -> Result<u32, ParseError> {
        let mut value = 0u32;
        for _ in 0..n {
            let c = self.bump().ok_or(ParseError::UnexpectedEnd)?;
            let d = c.to_digit(16).ok_or(ParseError::InvalidEscape(c, at))?;
            value = value * 16 + d;
        }
        Ok(value)
    }
}

enum Escape {
    Char(u32),
    Class(Vec<(u32, u32)>, bool),
}
