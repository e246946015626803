//! Property-based tests for the assembler, the image codec and the ALU.

use proptest::prelude::*;
use trn::asm::image;
use trn::isa::word::{self, WORD_MASK};
use trn::{assemble, Cpu, Memory};

const JMP: u32 = 19 << 15;

fn nops(count: usize) -> String {
    "NOP\n".repeat(count)
}

proptest! {
    /// Property: a memory image decodes back to the memory it was encoded from
    #[test]
    fn prop_image_roundtrip(words in prop::collection::vec(0u32..=WORD_MASK, 0..64)) {
        let memory = Memory::from_words(words);
        let text = image::encode_to_string(&memory);
        prop_assert_eq!(image::decode(&text).unwrap(), memory);
    }

    /// Property: CON stores any in-range value as its 20-bit pattern
    #[test]
    fn prop_con_masks_to_word(value in -(1i64 << 19)..(1i64 << 20)) {
        let memory = assemble(&format!("NAM P\nCON {}\nEND", value)).unwrap();
        prop_assert_eq!(memory.words(), &[(value as u32) & WORD_MASK][..]);
    }

    /// Property: hex and decimal literals assemble identically
    #[test]
    fn prop_hex_and_decimal_equivalent(value in 0u32..8192) {
        let hex = assemble(&format!("NAM P\nLDA ${:X}\nEND", value)).unwrap();
        let dec = assemble(&format!("NAM P\nLDA {}\nEND", value)).unwrap();
        prop_assert_eq!(hex, dec);
    }

    /// Property: a forward reference resolves to the label's address
    #[test]
    fn prop_forward_reference(pad in 0usize..200) {
        let source = format!("NAM P\nJMP L\n{}L: HLT\nEND", nops(pad));
        let memory = assemble(&source).unwrap();
        prop_assert_eq!(memory.words()[0], JMP | (pad as u32 + 1));
    }

    /// Property: a backward reference resolves to the label's address
    #[test]
    fn prop_backward_reference(pad in 0usize..200) {
        let source = format!("NAM P\n{}L: HLT\nJMP L\nEND", nops(pad));
        let memory = assemble(&source).unwrap();
        prop_assert_eq!(memory.words()[pad + 1], JMP | pad as u32);
    }

    /// Property: label offsets add to the label's address
    #[test]
    fn prop_label_offset(pad in 0usize..100, offset in 0u32..100) {
        let source = format!("NAM P\nJMP L+{}\n{}L: HLT\nEND", offset, nops(pad));
        let memory = assemble(&source).unwrap();
        prop_assert_eq!(memory.words()[0], JMP | (pad as u32 + 1 + offset));
    }

    /// Property: ADA produces the 20-bit sum and flags signed overflow
    #[test]
    fn prop_ada_matches_signed_arithmetic(a in 0u32..=WORD_MASK, b in 0u32..=WORD_MASK) {
        let source = format!("NAM P\nLDA X\nADA Y\nHLT\nX: CON {}\nY: CON {}\nEND", a, b);
        let mut cpu = Cpu::new(assemble(&source).unwrap());
        cpu.run().unwrap();

        let exact = word::to_signed(a) as i64 + word::to_signed(b) as i64;
        let overflow = exact < -(1 << 19) || exact >= (1 << 19);
        prop_assert_eq!(cpu.regs.a, (a + b) & WORD_MASK);
        prop_assert_eq!(cpu.regs.v, overflow);
        prop_assert_eq!(cpu.regs.z, cpu.regs.a == 0);
        prop_assert_eq!(cpu.regs.s, word::is_negative(cpu.regs.a));
    }

    /// Property: the assembler never panics on arbitrary input
    #[test]
    fn prop_no_panic_on_garbage(source in "[ -~\n]{0,200}") {
        let _ = assemble(&source);
    }
}
