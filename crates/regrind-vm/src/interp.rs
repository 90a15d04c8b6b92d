//! The bytecode interpreter, instrumented for coverage.
//!
//! Every instruction with two or more successors reports the chosen
//! successor to the sink, including fall-throughs; scan loops report one
//! self-edge per skipped unit; failed equality checks report the expected
//! character as a mutation suggestion. The budget is polled once per
//! dispatched instruction and once per scan step, so a pathological
//! execution stops promptly after the caller's bound is spent.

use regrind_bytecode::{Instr, Opcode};
use regrind_fuzz::matcher::{CoverageSink, ExecError, MatchStatus};
use regrind_fuzz::unit::SubjectRef;

/// Per-thread mutable execution state: the backtrack stack.
#[derive(Debug, Default)]
pub struct Scratch {
    stack: Vec<Frame>,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    pc: u32,
    cursor: usize,
}

fn pack4(subject: &SubjectRef<'_>, at: usize) -> u32 {
    let mut packed = 0u32;
    for i in 0..4 {
        packed |= (subject.unit(at + i) & 0xff) << (8 * i);
    }
    packed
}

pub fn run(
    code: &[u8],
    subject: SubjectRef<'_>,
    scratch: &mut Scratch,
    sink: &mut dyn CoverageSink,
) -> Result<MatchStatus, ExecError> {
    scratch.stack.clear();
    let len = subject.len();

    let mut pc: u32 = 0;
    let mut cursor: usize = 0;
    let mut current: u32 = 0;
    let mut loaded_pos: usize = 0;
    let mut furthest: usize = 0;

    loop {
        if sink.over_budget() {
            sink.cursor(furthest as u32);
            return Ok(MatchStatus::BudgetExceeded);
        }

        let instr = Instr::at(code, pc)
            .ok_or_else(|| ExecError::EngineFault(format!("bad pc {:#x}", pc)))?;
        let next = instr.next_pc();

        // Take a two-way branch, covering the chosen successor.
        macro_rules! branch {
            ($cond:expr, $target:expr) => {{
                let dst = if $cond { $target } else { next };
                sink.cover(pc, dst);
                pc = dst;
            }};
        }

        match instr.opcode {
            Opcode::Fail => {
                sink.cursor(furthest as u32);
                return Ok(MatchStatus::NoMatch);
            }
            Opcode::Succeed => {
                sink.cursor(furthest as u32);
                return Ok(MatchStatus::Match);
            }
            Opcode::Advance => {
                cursor += instr.imm() as usize;
                pc = next;
            }
            Opcode::Goto => {
                pc = instr.operand_u32(4);
            }
            Opcode::PushBacktrack => {
                scratch.stack.push(Frame {
                    pc: instr.operand_u32(4),
                    cursor,
                });
                pc = next;
            }
            Opcode::Backtrack => match scratch.stack.pop() {
                Some(frame) => {
                    sink.cover(pc, frame.pc);
                    cursor = frame.cursor;
                    pc = frame.pc;
                }
                None => {
                    sink.cursor(furthest as u32);
                    return Ok(MatchStatus::NoMatch);
                }
            },
            Opcode::LoadCurrentChar => {
                let idx = cursor as i64 + instr.imm_signed() as i64;
                let oob = idx < 0 || idx >= len as i64;
                if !oob {
                    loaded_pos = idx as usize;
                    current = subject.unit(loaded_pos);
                    furthest = furthest.max(loaded_pos);
                }
                branch!(oob, instr.operand_u32(4));
            }
            Opcode::CheckChar => {
                let want = instr.imm();
                let target = instr.operand_u32(4);
                if current != want {
                    sink.suggest(pc, target, want as u16, loaded_pos as i32);
                }
                branch!(current == want, target);
            }
            Opcode::CheckNotChar => {
                let want = instr.imm();
                let target = instr.operand_u32(4);
                if current != want {
                    sink.suggest(pc, next, want as u16, loaded_pos as i32);
                }
                branch!(current != want, target);
            }
            Opcode::AndCheckChar => {
                let want = instr.imm();
                let mask = instr.operand_u32(4);
                let target = instr.operand_u32(8);
                if current & mask != want {
                    sink.suggest(pc, target, want as u16, loaded_pos as i32);
                }
                branch!(current & mask == want, target);
            }
            Opcode::AndCheckNotChar => {
                let want = instr.imm();
                let mask = instr.operand_u32(4);
                let target = instr.operand_u32(8);
                if current & mask != want {
                    sink.suggest(pc, next, want as u16, loaded_pos as i32);
                }
                branch!(current & mask != want, target);
            }
            Opcode::Check4Chars | Opcode::CheckNot4Chars => {
                let want = instr.operand_u32(4);
                let target = instr.operand_u32(8);
                let equal = cursor + 4 <= len && pack4(&subject, cursor) == want;
                if !equal && cursor < len {
                    sink.suggest(pc, next, (want & 0xff) as u16, cursor as i32);
                }
                if equal {
                    furthest = furthest.max(cursor + 3);
                }
                let jump = (instr.opcode == Opcode::Check4Chars) == equal;
                branch!(jump, target);
            }
            Opcode::AndCheck4Chars | Opcode::AndCheckNot4Chars => {
                let want = instr.operand_u32(4);
                let mask = instr.operand_u32(8);
                let target = instr.operand_u32(12);
                let equal = cursor + 4 <= len && pack4(&subject, cursor) & mask == want;
                if !equal && cursor < len {
                    sink.suggest(pc, next, (want & 0xff) as u16, cursor as i32);
                }
                if equal {
                    furthest = furthest.max(cursor + 3);
                }
                let jump = (instr.opcode == Opcode::AndCheck4Chars) == equal;
                branch!(jump, target);
            }
            Opcode::CheckCharInRange => {
                let from = instr.operand_u16(4) as u32;
                let to = instr.operand_u16(6) as u32;
                branch!(from <= current && current <= to, instr.operand_u32(8));
            }
            Opcode::CheckCharNotInRange => {
                let from = instr.operand_u16(4) as u32;
                let to = instr.operand_u16(6) as u32;
                branch!(current < from || current > to, instr.operand_u32(8));
            }
            Opcode::CheckLt => {
                branch!(current < instr.imm(), instr.operand_u32(4));
            }
            Opcode::CheckGt => {
                branch!(current > instr.imm(), instr.operand_u32(4));
            }
            Opcode::CheckAtStart => {
                branch!(cursor != 0, instr.operand_u32(4));
            }
            Opcode::CheckAtEnd => {
                branch!(cursor != len, instr.operand_u32(4));
            }
            Opcode::SkipUntilChar
            | Opcode::SkipUntilCharPosChecked
            | Opcode::SkipUntilCharAnd => {
                let offset = instr.imm_signed() as i64;
                let advance_by = instr.operand_u16(4).max(1) as usize;
                let want = instr.operand_u16(6) as u32;
                let (mask, on_found, on_oob, max_pos) = match instr.opcode {
                    Opcode::SkipUntilCharAnd => (
                        instr.operand_u32(8),
                        instr.operand_u32(12),
                        instr.operand_u32(16),
                        u32::MAX,
                    ),
                    Opcode::SkipUntilCharPosChecked => (
                        u32::MAX,
                        instr.operand_u32(8),
                        instr.operand_u32(12),
                        instr.operand_u32(16),
                    ),
                    _ => (
                        u32::MAX,
                        instr.operand_u32(8),
                        instr.operand_u32(12),
                        u32::MAX,
                    ),
                };

                loop {
                    let idx = cursor as i64 + offset;
                    if idx < 0 || idx >= len as i64 || idx > max_pos as i64 {
                        branch!(true, on_oob);
                        break;
                    }
                    let at = idx as usize;
                    furthest = furthest.max(at);
                    if subject.unit(at) & mask == want {
                        branch!(true, on_found);
                        break;
                    }
                    cursor += advance_by;
                    sink.cover_self(pc);
                    if sink.over_budget() {
                        sink.cursor(furthest as u32);
                        return Ok(MatchStatus::BudgetExceeded);
                    }
                }
            }
        }
    }
}
