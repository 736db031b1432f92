//! Executable signature detection and entry point resolution
//! (spec.md §6, "Executable detection" / "Entry point").
//!
//! This is a small, self-contained stand-in for the `exe.h` /
//! `pe.c` / `elf.c` helpers referenced from `original_source/libyara.c`
//! (`is_pe`, `is_elf`, `get_entry_point_offset`,
//! `get_entry_point_address`). A full PE/ELF parser is out of scope —
//! the core only needs enough header reading to resolve `entrypoint`
//! and `is_executable`/`REQUIRE_EXECUTABLE` (spec.md §4.5).

/// Returns `true` if `data` starts with a DOS/PE header (`MZ` at offset
/// 0) with a valid pointer to a `PE\0\0` signature.
pub fn is_pe(data: &[u8]) -> bool {
    pe_header_offset(data).is_some()
}

/// Returns `true` if `data` starts with the ELF magic (`\x7fELF`).
pub fn is_elf(data: &[u8]) -> bool {
    data.len() >= 4 && &data[0..4] == b"\x7fELF"
}

fn pe_header_offset(data: &[u8]) -> Option<usize> {
    if data.len() < 0x40 || &data[0..2] != b"MZ" {
        return None;
    }
    let e_lfanew = u32::from_le_bytes(data.get(0x3C..0x40)?.try_into().ok()?) as usize;
    if data.get(e_lfanew..e_lfanew + 4)? == b"PE\0\0" {
        Some(e_lfanew)
    } else {
        None
    }
}

/// `AddressOfEntryPoint` from the PE optional header, as a *file
/// offset* (spec.md: "for files as file offset").
///
/// Returns `None` when the header can't be located or is too short —
/// per spec.md §9 this collapses to `undefined` at the evaluator
/// boundary, it is not a scan error.
pub fn pe_entry_point_offset(data: &[u8]) -> Option<u32> {
    let pe = pe_header_offset(data)?;
    // COFF file header is 20 bytes right after the `PE\0\0` signature;
    // the optional header follows it. AddressOfEntryPoint is at offset
    // 16 of the optional header for both PE32 and PE32+.
    let opt_header = pe + 4 + 20;
    let bytes = data.get(opt_header + 16..opt_header + 20)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// ELF `e_entry`, as an absolute address (spec.md: "for process memory
/// return as absolute address").
pub fn elf_entry_point(data: &[u8]) -> Option<u64> {
    if !is_elf(data) {
        return None;
    }
    let is_64 = *data.get(4)? == 2;
    let is_le = *data.get(5)? == 1;
    if !is_le {
        // Only little-endian ELF is supported; big-endian collapses to
        // undefined like any other unresolvable entry point.
        return None;
    }
    if is_64 {
        let bytes = data.get(24..32)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    } else {
        let bytes = data.get(24..28)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?) as u64)
    }
}

/// Resolves `entrypoint` for a file scan (spec.md §4.5: "lazily compute
/// entry_point ... from the first block that yields a value ...
/// get_entry_point_offset").
pub fn get_entry_point_offset(data: &[u8]) -> Option<u64> {
    if is_pe(data) {
        pe_entry_point_offset(data).map(|v| v as u64)
    } else if is_elf(data) {
        elf_entry_point(data)
    } else {
        None
    }
}

/// Resolves `entrypoint` when scanning process memory: the entry point
/// is returned as an absolute address relative to `base` rather than a
/// file offset (spec.md §4.5, §6).
pub fn get_entry_point_address(data: &[u8], base: u64) -> Option<u64> {
    get_entry_point_offset(data).map(|off| base + off)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pe() -> Vec<u8> {
        let mut data = vec![0u8; 0x200];
        data[0..2].copy_from_slice(b"MZ");
        let e_lfanew: u32 = 0x80;
        data[0x3C..0x40].copy_from_slice(&e_lfanew.to_le_bytes());
        data[0x80..0x84].copy_from_slice(b"PE\0\0");
        // AddressOfEntryPoint at opt_header + 16 = 0x80 + 4 + 20 + 16 = 0xC8
        data[0xC8..0xCC].copy_from_slice(&0x1000u32.to_le_bytes());
        data
    }

    fn minimal_elf64() -> Vec<u8> {
        let mut data = vec![0u8; 64];
        data[0..4].copy_from_slice(b"\x7fELF");
        data[4] = 2; // ELFCLASS64
        data[5] = 1; // little endian
        data[24..32].copy_from_slice(&0x4010_0000u64.to_le_bytes());
        data
    }

    #[test]
    fn detects_pe_and_resolves_entry_point() {
        let data = minimal_pe();
        assert!(is_pe(&data));
        assert!(!is_elf(&data));
        assert_eq!(pe_entry_point_offset(&data), Some(0x1000));
        assert_eq!(get_entry_point_offset(&data), Some(0x1000));
    }

    #[test]
    fn detects_elf_and_resolves_entry_point() {
        let data = minimal_elf64();
        assert!(is_elf(&data));
        assert!(!is_pe(&data));
        assert_eq!(elf_entry_point(&data), Some(0x4010_0000));
        assert_eq!(get_entry_point_address(&data, 0), Some(0x4010_0000));
    }

    #[test]
    fn neither_signature_is_detected_in_plain_data() {
        let data = b"just some plain bytes, nothing special here";
        assert!(!is_pe(data));
        assert!(!is_elf(data));
        assert_eq!(get_entry_point_offset(data), None);
    }
}
