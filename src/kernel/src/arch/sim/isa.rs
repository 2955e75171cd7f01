//! Instruction set of the simulated CPU.
//!
//! Every instruction is 8 bytes: `[opcode, a, b, 0, imm (u32 le)]`, where
//! `a` and `b` name registers. Jumps and `lea` are relative to the next
//! instruction, so programs run wherever they are loaded.

use alloc::vec::Vec;

/// `eax`.
pub const EAX: u8 = 0;
/// `ebx`.
pub const EBX: u8 = 1;
/// `ecx`.
pub const ECX: u8 = 2;
/// `edx`.
pub const EDX: u8 = 3;
/// `esi`.
pub const ESI: u8 = 4;
/// `edi`.
pub const EDI: u8 = 5;
/// `ebp`.
pub const EBP: u8 = 6;

/// Instruction length in bytes.
pub const INSN_SIZE: usize = 8;

/// Operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// `a = imm`
    Li = 1,
    /// `a = b`
    Mov = 2,
    /// `a += imm`
    Addi = 3,
    /// `a = next + imm`
    Lea = 4,
    /// `mem8[a] = b`
    Sb = 5,
    /// `a = mem8[b]`
    Lb = 6,
    /// Software interrupt `imm`.
    Int = 7,
    /// `pc = next + imm`
    Jmp = 8,
    /// Jump if `a == 0`.
    Jz = 9,
    /// Jump if `a != 0`.
    Jnz = 10,
    /// Jump if `a == b`.
    Beq = 11,
}

impl Op {
    /// Decodes an opcode byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Op::Li,
            2 => Op::Mov,
            3 => Op::Addi,
            4 => Op::Lea,
            5 => Op::Sb,
            6 => Op::Lb,
            7 => Op::Int,
            8 => Op::Jmp,
            9 => Op::Jz,
            10 => Op::Jnz,
            11 => Op::Beq,
            _ => return None,
        })
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insn {
    /// Operation.
    pub op: Op,
    /// First register.
    pub a: u8,
    /// Second register.
    pub b: u8,
    /// Immediate.
    pub imm: u32,
}

impl Insn {
    /// Decodes 8 instruction bytes; `None` for an invalid opcode or register.
    pub fn decode(bytes: [u8; INSN_SIZE]) -> Option<Self> {
        let op = Op::from_byte(bytes[0])?;
        if bytes[1] > EBP || bytes[2] > EBP {
            return None;
        }
        Some(Insn {
            op,
            a: bytes[1],
            b: bytes[2],
            imm: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    /// Encodes the instruction.
    pub fn encode(self) -> [u8; INSN_SIZE] {
        let imm = self.imm.to_le_bytes();
        [self.op as u8, self.a, self.b, 0, imm[0], imm[1], imm[2], imm[3]]
    }
}

/// A jump target, resolved when the program is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Builds a position-independent program image: code followed by data.
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<Insn>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
    data: Vec<u8>,
    data_refs: Vec<(usize, usize)>,
}

impl Assembler {
    /// An empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, unplaced label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Places `label` at the next instruction.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len() * INSN_SIZE);
    }

    fn emit(&mut self, op: Op, a: u8, b: u8, imm: u32) -> &mut Self {
        self.code.push(Insn { op, a, b, imm });
        self
    }

    fn emit_jump(&mut self, op: Op, a: u8, b: u8, target: Label) -> &mut Self {
        self.fixups.push((self.code.len(), target));
        self.emit(op, a, b, 0)
    }

    /// `a = imm`
    pub fn li(&mut self, a: u8, imm: u32) -> &mut Self {
        self.emit(Op::Li, a, 0, imm)
    }

    /// `a = b`
    pub fn mov(&mut self, a: u8, b: u8) -> &mut Self {
        self.emit(Op::Mov, a, b, 0)
    }

    /// `a += imm`
    pub fn addi(&mut self, a: u8, imm: u32) -> &mut Self {
        self.emit(Op::Addi, a, 0, imm)
    }

    /// `a = image start + offset`
    pub fn lea_image(&mut self, a: u8, offset: usize) -> &mut Self {
        let next = (self.code.len() + 1) * INSN_SIZE;
        self.emit(Op::Lea, a, 0, offset.wrapping_sub(next) as u32)
    }

    /// `a = address of data bytes appended with [`data`](Self::data)`
    pub fn lea_data(&mut self, a: u8, data_offset: usize) -> &mut Self {
        self.data_refs.push((self.code.len(), data_offset));
        self.emit(Op::Lea, a, 0, 0)
    }

    /// `mem8[a] = b`
    pub fn sb(&mut self, a: u8, b: u8) -> &mut Self {
        self.emit(Op::Sb, a, b, 0)
    }

    /// `a = mem8[b]`
    pub fn lb(&mut self, a: u8, b: u8) -> &mut Self {
        self.emit(Op::Lb, a, b, 0)
    }

    /// Software interrupt.
    pub fn int(&mut self, intno: u32) -> &mut Self {
        self.emit(Op::Int, 0, 0, intno)
    }

    /// Unconditional jump.
    pub fn jmp(&mut self, target: Label) -> &mut Self {
        self.emit_jump(Op::Jmp, 0, 0, target)
    }

    /// Jump if `a == 0`.
    pub fn jz(&mut self, a: u8, target: Label) -> &mut Self {
        self.emit_jump(Op::Jz, a, 0, target)
    }

    /// Jump if `a != 0`.
    pub fn jnz(&mut self, a: u8, target: Label) -> &mut Self {
        self.emit_jump(Op::Jnz, a, 0, target)
    }

    /// Jump if `a == b`.
    pub fn beq(&mut self, a: u8, b: u8, target: Label) -> &mut Self {
        self.emit_jump(Op::Beq, a, b, target)
    }

    /// Appends data bytes after the code and returns their offset in the
    /// data area.
    pub fn data(&mut self, bytes: &[u8]) -> usize {
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        offset
    }

    /// Resolves labels and returns the image. `None` if a label was never
    /// bound.
    pub fn finish(mut self) -> Option<Vec<u8>> {
        for &(at, label) in &self.fixups {
            let target = (*self.labels.get(label.0)?)?;
            let next = (at + 1) * INSN_SIZE;
            self.code[at].imm = target.wrapping_sub(next) as u32;
        }
        let data_start = self.code.len() * INSN_SIZE;
        for &(at, offset) in &self.data_refs {
            let next = (at + 1) * INSN_SIZE;
            self.code[at].imm = (data_start + offset).wrapping_sub(next) as u32;
        }
        let mut image: Vec<u8> = self.code.iter().flat_map(|insn| insn.encode()).collect();
        image.extend_from_slice(&self.data);
        Some(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let insn = Insn {
            op: Op::Beq,
            a: EAX,
            b: EDX,
            imm: 0xFFFF_FFF0,
        };
        assert_eq!(Insn::decode(insn.encode()), Some(insn));
        assert_eq!(Insn::decode([0xEE, 0, 0, 0, 0, 0, 0, 0]), None);
        assert_eq!(Insn::decode([1, 9, 0, 0, 0, 0, 0, 0]), None);
    }

    #[test]
    fn test_backward_jump_is_relative() {
        let mut asm = Assembler::new();
        let top = asm.label();
        asm.bind(top);
        asm.int(50).jmp(top);
        let image = asm.finish().unwrap();
        let jmp = Insn::decode(image[8..16].try_into().unwrap()).unwrap();
        assert_eq!(jmp.op, Op::Jmp);
        // next is 16, target is 0
        assert_eq!(jmp.imm as i32, -16);
    }

    #[test]
    fn test_data_follows_code() {
        let mut asm = Assembler::new();
        let msg = asm.data(b"hi\0");
        asm.lea_data(EAX, msg).int(48);
        let image = asm.finish().unwrap();
        assert_eq!(&image[16..], b"hi\0");
        let lea = Insn::decode(image[0..8].try_into().unwrap()).unwrap();
        assert_eq!(lea.imm, 8);
    }

    #[test]
    fn test_unbound_label_fails() {
        let mut asm = Assembler::new();
        let nowhere = asm.label();
        asm.jmp(nowhere);
        assert!(asm.finish().is_none());
    }
}
