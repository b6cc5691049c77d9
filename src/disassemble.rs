//! Thin adaptor over the [iced_x86] disassembly engine.

use std::fmt::{self, Display};

use iced_x86::{Decoder, DecoderOptions, Formatter, NasmFormatter};

const CODE_BITNESS: u32 = 64;

/// One decoded instruction of target code
#[derive(Debug, Clone)]
pub struct Instruction {
    pub address: u64,
    pub len: usize,
    pub text: String,
}

/// A decoded run of target bytes
#[derive(Debug, Clone)]
pub struct Disassembly {
    instructions: Vec<Instruction>,
}

impl Disassembly {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
}

/// Decodes `data` as x86-64 code mapped at `ip`
pub fn disassemble(data: &[u8], ip: u64) -> Disassembly {
    let mut decoder = Decoder::with_ip(CODE_BITNESS, data, ip, DecoderOptions::NONE);

    let mut formatter = NasmFormatter::new();
    formatter.options_mut().set_first_operand_char_index(10);
    formatter.options_mut().set_rip_relative_addresses(true);

    let mut instructions = Vec::new();
    for instruction in &mut decoder {
        let mut text = String::new();
        formatter.format(&instruction, &mut text);
        instructions.push(Instruction {
            address: instruction.ip(),
            len: instruction.len(),
            text,
        });
    }
    Disassembly { instructions }
}

impl Display for Disassembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instruction in &self.instructions {
            writeln!(f, "{:016x}  {}", instruction.address, instruction.text)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_disassemble_trampoline_shape() {
        // mov rax, imm64; jmp rax; ret
        let mut code = vec![0x48, 0xB8];
        code.extend_from_slice(&0xdead_beefu64.to_le_bytes());
        code.extend_from_slice(&[0xFF, 0xE0, 0xC3]);

        let disasm = disassemble(&code, 0x1000);
        let texts: Vec<&str> = disasm
            .instructions()
            .iter()
            .map(|i| i.text.as_str())
            .collect();
        assert_eq!(disasm.instructions().len(), 3);
        assert!(texts[0].starts_with("mov"));
        assert!(texts[1].starts_with("jmp"));
        assert!(texts[2].starts_with("ret"));
        assert_eq!(disasm.instructions()[0].address, 0x1000);
        assert_eq!(disasm.instructions()[0].len, 10);
    }
}
