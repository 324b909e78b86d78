//! Emission of global variable definitions: `.data`/`.bss` placement,
//! `.globl`/`.local` linkage, and byte-by-byte initializer dumps with
//! `.quad "sym"+addend` relocations spliced in at the right offsets.

use crate::sema::{InitData, Object};

use super::error::CodeGenError;
use super::state::CodeGen;

pub fn emit_global(cg: &mut CodeGen, obj: &Object) -> Result<(), CodeGenError> {
    if obj.is_function {
        return Ok(());
    }
    if !obj.is_definition.get() {
        return Ok(());
    }

    let quoted = format!("\"{}\"", obj.name);

    if !obj.is_static {
        cg.emit(format_args!("  .globl {quoted}"))?;
    } else {
        cg.emit(format_args!("  .local {quoted}"))?;
    }

    let size = obj.ty.size.get().max(0);
    let align = obj.ty.align.get().max(1);

    if obj.is_tentative.get() {
        // No initializer: a zero-filled reservation, COMMON unless
        // `-fno-common`/the object is `static`.
        if obj.is_static {
            cg.emit(format_args!("  .bss"))?;
            cg.emit(format_args!("  .align {align}"))?;
            cg.emit(format_args!("{quoted}:"))?;
            cg.emit(format_args!("  .zero {size}"))?;
        } else {
            cg.emit(format_args!("  .comm {quoted}, {size}, {align}"))?;
        }
        return Ok(());
    }

    let section = if obj.is_tls { ".tdata" } else { ".data" };
    cg.emit(format_args!("  {section}"))?;
    cg.emit(format_args!("  .align {align}"))?;
    cg.emit(format_args!("{quoted}:"))?;

    let data = obj.init_data.borrow();
    let data = data.as_ref().cloned().unwrap_or_default();
    emit_init_bytes(cg, &data, size)?;
    Ok(())
}

fn emit_init_bytes(cg: &mut CodeGen, data: &InitData, total_size: i64) -> Result<(), CodeGenError> {
    let total_size = total_size.max(data.bytes.len() as i64) as usize;
    let mut i = 0usize;
    while i < total_size {
        if let Some(reloc) = data.relocations.iter().find(|r| r.offset as usize == i) {
            let addend = reloc.addend;
            if addend == 0 {
                cg.emit(format_args!("  .quad \"{}\"", reloc.symbol))?;
            } else if addend > 0 {
                cg.emit(format_args!("  .quad \"{}\"+{}", reloc.symbol, addend))?;
            } else {
                cg.emit(format_args!("  .quad \"{}\"{}", reloc.symbol, addend))?;
            }
            i += 8;
            continue;
        }
        let byte = data.bytes.get(i).copied().unwrap_or(0);
        cg.emit(format_args!("  .byte {byte}"))?;
        i += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::Relocation;

    #[test]
    fn bytes_and_relocation_interleave() {
        let mut cg = CodeGen::new();
        let data = InitData {
            bytes: vec![0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0],
            relocations: vec![Relocation { offset: 0, symbol: "target".into(), addend: 4 }],
        };
        emit_init_bytes(&mut cg, &data, 12).unwrap();
        assert!(cg.out.contains(".quad \"target\"+4"));
        assert!(cg.out.contains(".byte 1"));
    }
}
