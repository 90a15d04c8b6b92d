//! AST-to-bytecode compiler, one program per code-unit width.
//!
//! Programs follow the backtracking convention: success falls through,
//! local failure jumps to a shared `Backtrack` instruction, and the outer
//! retry loop re-attempts the whole pattern at each start position. When
//! the pattern opens with a known literal, the retry loop is replaced by a
//! `SkipUntilChar` scan over the subject.

use regrind_bytecode::{Label, ProgramBuilder};
use regrind_fuzz::config::RegexFlags;
use regrind_fuzz::unit::Width;
use thiserror::Error;

use crate::parser::{Ast, CharClass};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileLimit {
    #[error("unbounded repetition of a pattern that can match empty")]
    NullableRepeat,

    #[error("quantifier bound {0} exceeds the supported maximum")]
    QuantifierTooLarge(u32),
}

const MAX_REPEAT_UNROLL: u32 = 255;

pub fn compile(ast: &Ast, width: Width, flags: &RegexFlags) -> Result<Vec<u8>, CompileLimit> {
    let mut b = ProgramBuilder::new();
    let bt = b.new_label();
    let mut e = Emitter {
        b,
        bt,
        width,
        flags: *flags,
        pending_skip: None,
    };

    match first_literal(ast).filter(|&c| c <= 0xffff) {
        Some(c) => {
            // The scan below already verified the first literal; the body
            // enters at its position and only needs to step past it.
            e.pending_skip = Some(c);
            let scan = e.b.new_label();
            let found = e.b.new_label();
            let retry = e.b.new_label();
            let no_more = e.b.new_label();

            e.b.bind(scan);
            if e.flags.ignore_case && is_ascii_alpha(c) {
                e.b.skip_until_char_and(
                    0,
                    1,
                    (c as u16) & !0x20,
                    e.unit_mask() & !0x20,
                    found,
                    no_more,
                );
            } else {
                e.b.skip_until_char(0, 1, c as u16, found, no_more);
            }
            e.b.bind(found);
            e.b.push_backtrack(retry);
            e.node(ast)?;
            e.b.succeed();
            e.b.bind(retry);
            e.b.advance(1);
            e.b.goto(scan);
            e.b.bind(no_more);
            e.b.fail();
        }
        None => {
            let attempt = e.b.new_label();
            let retry = e.b.new_label();
            let more = e.b.new_label();

            e.b.bind(attempt);
            e.b.push_backtrack(retry);
            e.node(ast)?;
            e.b.succeed();
            e.b.bind(retry);
            e.b.check_at_end(more);
            e.b.fail();
            e.b.bind(more);
            e.b.advance(1);
            e.b.goto(attempt);
        }
    }

    e.b.bind(e.bt);
    e.b.backtrack();
    Ok(e.b.finish())
}

/// The literal the pattern must begin with, if one is statically known.
fn first_literal(ast: &Ast) -> Option<u32> {
    match ast {
        Ast::Char(c) => Some(*c),
        Ast::Group(inner) => first_literal(inner),
        Ast::Concat(nodes) => nodes
            .iter()
            .find(|n| !matches!(n, Ast::Empty))
            .and_then(first_literal),
        Ast::Repeat { node, min, .. } if *min >= 1 => first_literal(node),
        _ => None,
    }
}

fn is_ascii_alpha(c: u32) -> bool {
    (0x41..=0x5a).contains(&(c & !0x20))
}

struct Emitter {
    b: ProgramBuilder,
    bt: Label,
    width: Width,
    flags: RegexFlags,
    /// First literal already matched by the scan preamble; the next
    /// occurrence in emit order advances without re-checking.
    pending_skip: Option<u32>,
}

impl Emitter {
    fn unit_max(&self) -> u32 {
        match self.width {
            Width::One => 0xff,
            Width::Two => 0xffff,
        }
    }

    fn unit_mask(&self) -> u32 {
        self.unit_max()
    }

    fn node(&mut self, ast: &Ast) -> Result<(), CompileLimit> {
        match ast {
            Ast::Empty => Ok(()),
            Ast::Char(c) => {
                self.literal(*c);
                Ok(())
            }
            Ast::Class(class) => {
                self.class(class);
                Ok(())
            }
            Ast::Dot => {
                let class = self.dot_class();
                self.class(&class);
                Ok(())
            }
            Ast::StartAnchor => {
                self.start_anchor();
                Ok(())
            }
            Ast::EndAnchor => {
                self.end_anchor();
                Ok(())
            }
            Ast::Group(inner) => self.node(inner),
            Ast::Concat(nodes) => self.concat(nodes),
            Ast::Alternate(branches) => self.alternate(branches),
            Ast::Repeat {
                node,
                min,
                max,
                greedy,
            } => self.repeat(node, *min, *max, *greedy),
        }
    }

    /// One literal scalar: a single unit check, or a surrogate pair at
    /// two-byte width. A literal that cannot exist at this width becomes an
    /// unconditional local failure.
    fn literal(&mut self, c: u32) {
        if self.pending_skip == Some(c) {
            self.pending_skip = None;
            self.b.advance(1);
            return;
        }
        if c > self.unit_max() {
            if self.width == Width::Two && c <= 0x10_ffff {
                let v = c - 0x1_0000;
                self.unit_check(0xd800 + (v >> 10));
                self.unit_check(0xdc00 + (v & 0x3ff));
            } else {
                self.b.goto(self.bt);
            }
            return;
        }
        self.unit_check(c);
    }

    /// Check-and-advance for one in-range unit.
    fn unit_check(&mut self, c: u32) {
        self.b.load_current_char(0, self.bt);
        if self.flags.ignore_case && is_ascii_alpha(c) {
            self.b
                .and_check_not_char(c & !0x20, self.unit_mask() & !0x20, self.bt);
        } else {
            self.b.check_not_char(c, self.bt);
        }
        self.b.advance(1);
    }

    fn concat(&mut self, nodes: &[Ast]) -> Result<(), CompileLimit> {
        let mut i = 0;
        while i < nodes.len() {
            // Literal runs of four one-byte units compile to packed
            // four-char checks.
            if self.width == Width::One {
                let mut run: Vec<u8> = Vec::new();
                let mut j = i;
                while let Some(Ast::Char(c)) = nodes.get(j) {
                    if *c > 0xff {
                        break;
                    }
                    run.push(*c as u8);
                    j += 1;
                }
                if run.len() >= 4 {
                    if self.pending_skip == Some(run[0] as u32) {
                        self.pending_skip = None;
                        self.b.advance(1);
                        run.remove(0);
                    }
                    let whole = run.len() - run.len() % 4;
                    for chunk in run[..whole].chunks_exact(4) {
                        self.four_chars(chunk);
                    }
                    for &c in &run[whole..] {
                        self.unit_check(c as u32);
                    }
                    i = j;
                    continue;
                }
            }
            self.node(&nodes[i])?;
            i += 1;
        }
        Ok(())
    }

    fn four_chars(&mut self, chunk: &[u8]) {
        let mut packed = [0u8; 4];
        packed.copy_from_slice(chunk);
        if self.flags.ignore_case && chunk.iter().any(|&c| is_ascii_alpha(c as u32)) {
            let mut mask = [0xffu8; 4];
            for (i, &c) in chunk.iter().enumerate() {
                if is_ascii_alpha(c as u32) {
                    packed[i] = c & !0x20;
                    mask[i] = 0xdf;
                }
            }
            self.b.and_check_not_4_chars(
                u32::from_le_bytes(packed),
                u32::from_le_bytes(mask),
                self.bt,
            );
        } else {
            self.b.check_not_4_chars(u32::from_le_bytes(packed), self.bt);
        }
        self.b.advance(4);
    }

    fn dot_class(&self) -> CharClass {
        if self.flags.dot_all {
            CharClass {
                ranges: vec![(0, self.unit_max())],
                negated: false,
            }
        } else {
            // Everything but the line terminators.
            CharClass {
                ranges: vec![(0x0a, 0x0a), (0x0d, 0x0d), (0x2028, 0x2029)],
                negated: true,
            }
        }
    }

    /// Ranges clipped to this width and folded for `i`, with the u16
    /// operand ceiling applied.
    fn effective_ranges(&self, class: &CharClass) -> Vec<(u32, u32)> {
        let max = self.unit_max();
        let mut folded = CharClass {
            ranges: class
                .ranges
                .iter()
                .filter(|&&(from, _)| from <= max)
                .map(|&(from, to)| (from, to.min(max)))
                .collect(),
            negated: class.negated,
        };
        if self.flags.ignore_case {
            let mut extra = Vec::new();
            for &(from, to) in &folded.ranges {
                for (src, delta) in [(0x41u32..=0x5a, 0x20i32), (0x61..=0x7a, -0x20)] {
                    let lo = from.max(*src.start());
                    let hi = to.min(*src.end());
                    if lo <= hi {
                        extra.push((
                            (lo as i32 + delta) as u32,
                            (hi as i32 + delta) as u32,
                        ));
                    }
                }
            }
            folded.ranges.extend(extra);
        }
        folded.normalize();
        folded.ranges
    }

    fn class(&mut self, class: &CharClass) {
        let ranges = self.effective_ranges(class);

        if ranges.is_empty() {
            if class.negated {
                // Nothing excluded: any in-bounds unit matches.
                self.b.load_current_char(0, self.bt);
                self.b.advance(1);
            } else {
                self.b.goto(self.bt);
            }
            return;
        }

        self.b.load_current_char(0, self.bt);

        if class.negated {
            for &(from, to) in &ranges {
                self.range_check(from, to, self.bt);
            }
        } else if let [(from, to)] = ranges[..] {
            self.single_range(from, to);
        } else {
            let ok = self.b.new_label();
            for &(from, to) in &ranges {
                if from == to {
                    self.b.check_char(from, ok);
                } else {
                    self.b.check_char_in_range(from as u16, to as u16, ok);
                }
            }
            self.b.goto(self.bt);
            self.b.bind(ok);
        }
        self.b.advance(1);
    }

    /// Positive single-range check: fail when the current unit is outside
    /// `[from, to]`. One-sided ranges use the cheaper compare forms.
    fn single_range(&mut self, from: u32, to: u32) {
        if from == to {
            self.b.check_not_char(from, self.bt);
        } else if from == 0 && to == self.unit_max() {
            // Full range: the load's bounds check was the whole test.
        } else if from == 0 {
            self.b.check_gt(to, self.bt);
        } else if to == self.unit_max() {
            self.b.check_lt(from, self.bt);
        } else {
            self.b.check_char_not_in_range(from as u16, to as u16, self.bt);
        }
    }

    /// Jump to `target` when the current unit falls inside `[from, to]`.
    fn range_check(&mut self, from: u32, to: u32, target: Label) {
        if from == to {
            self.b.check_char(from, target);
        } else {
            self.b.check_char_in_range(from as u16, to as u16, target);
        }
    }

    fn start_anchor(&mut self) {
        if !self.flags.multiline {
            self.b.check_at_start(self.bt);
            return;
        }
        let ok = self.b.new_label();
        let check_prev = self.b.new_label();
        self.b.check_at_start(check_prev);
        self.b.goto(ok);
        self.b.bind(check_prev);
        self.b.load_current_char(-1, self.bt);
        self.b.check_char(0x0a, ok);
        self.b.goto(self.bt);
        self.b.bind(ok);
    }

    fn end_anchor(&mut self) {
        if !self.flags.multiline {
            self.b.check_at_end(self.bt);
            return;
        }
        let ok = self.b.new_label();
        let check_next = self.b.new_label();
        self.b.check_at_end(check_next);
        self.b.goto(ok);
        self.b.bind(check_next);
        self.b.load_current_char(0, self.bt);
        self.b.check_char(0x0a, ok);
        self.b.goto(self.bt);
        self.b.bind(ok);
    }

    fn alternate(&mut self, branches: &[Ast]) -> Result<(), CompileLimit> {
        let out = self.b.new_label();
        let (last, rest) = branches.split_last().expect("parser emits >= 2 branches");
        for branch in rest {
            let next = self.b.new_label();
            self.b.push_backtrack(next);
            self.node(branch)?;
            self.b.goto(out);
            self.b.bind(next);
        }
        self.node(last)?;
        self.b.bind(out);
        Ok(())
    }

    fn repeat(
        &mut self,
        node: &Ast,
        min: u32,
        max: Option<u32>,
        greedy: bool,
    ) -> Result<(), CompileLimit> {
        if max.is_none() && node.is_nullable() {
            return Err(CompileLimit::NullableRepeat);
        }
        if min > MAX_REPEAT_UNROLL {
            return Err(CompileLimit::QuantifierTooLarge(min));
        }
        if let Some(max) = max {
            if max - min > MAX_REPEAT_UNROLL {
                return Err(CompileLimit::QuantifierTooLarge(max));
            }
        }

        for _ in 0..min {
            self.node(node)?;
        }

        match max {
            None => {
                if greedy {
                    let head = self.b.new_label();
                    let out = self.b.new_label();
                    self.b.bind(head);
                    self.b.push_backtrack(out);
                    self.node(node)?;
                    self.b.goto(head);
                    self.b.bind(out);
                } else {
                    let head = self.b.new_label();
                    let take = self.b.new_label();
                    let out = self.b.new_label();
                    self.b.bind(head);
                    self.b.push_backtrack(take);
                    self.b.goto(out);
                    self.b.bind(take);
                    self.node(node)?;
                    self.b.goto(head);
                    self.b.bind(out);
                }
            }
            Some(max) => {
                let optional = max - min;
                if greedy {
                    let done = self.b.new_label();
                    for _ in 0..optional {
                        self.b.push_backtrack(done);
                        self.node(node)?;
                    }
                    self.b.bind(done);
                } else {
                    let out = self.b.new_label();
                    for _ in 0..optional {
                        let take = self.b.new_label();
                        self.b.push_backtrack(take);
                        self.b.goto(out);
                        self.b.bind(take);
                        self.node(node)?;
                    }
                    self.b.bind(out);
                }
            }
        }
        Ok(())
    }
}
