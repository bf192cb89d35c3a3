//! Disassembly is treated as an external capability: given `(address, bytes)`, return
//! `(mnemonic, operands, length)` for the first instruction. The watcher subprocess
//! is the sole caller — it decodes up to 16 bytes read from RIP at each trap.

use iced_x86::{Decoder, DecoderOptions, Formatter, NasmFormatter};

/// One decoded instruction, formatted the way the watcher's trap line expects:
/// `inst=<mnemonic> <op_str>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub text: String,
    pub length: usize,
}

pub trait Disassembler {
    fn decode_first(&self, address: u64, bytes: &[u8]) -> Option<DecodedInstruction>;
}

/// `iced-x86`-backed default implementation, 64-bit mode only (this crate is x86-64
/// only per its stated non-goals).
#[derive(Default)]
pub struct IcedDisassembler;

impl Disassembler for IcedDisassembler {
    fn decode_first(&self, address: u64, bytes: &[u8]) -> Option<DecodedInstruction> {
        let mut decoder = Decoder::with_ip(64, bytes, address, DecoderOptions::NONE);
        if !decoder.can_decode() {
            return None;
        }
        let instr = decoder.decode();
        if instr.is_invalid() {
            return None;
        }
        let mut formatter = NasmFormatter::new();
        let mut text = String::new();
        formatter.format(&instr, &mut text);
        Some(DecodedInstruction {
            text,
            length: instr.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_mov_eax_immediate() {
        // mov eax, 0x11223344
        let bytes = [0xB8, 0x44, 0x33, 0x22, 0x11];
        let decoded = IcedDisassembler.decode_first(0x1000, &bytes).unwrap();
        assert!(decoded.text.to_ascii_lowercase().starts_with("mov"));
        assert_eq!(decoded.length, 5);
    }
}
