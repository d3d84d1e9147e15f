//! Textual dump of an [`IrCode`], used by tests and trace logs.
use std::io;

use crate::{
    block::BlockId,
    code::IrCode,
    inst::{InstId, InstKind},
    value::ValueId,
};

pub struct IrWriter<'a> {
    code: &'a IrCode,
    level: u8,
}

impl<'a> IrWriter<'a> {
    pub fn new(code: &'a IrCode) -> Self {
        Self { code, level: 0 }
    }

    pub fn write(&mut self, mut w: impl io::Write) -> io::Result<()> {
        let code = self.code;
        for block in code.layout.iter_block() {
            self.write_block_with_inst(block, &mut w)?;
        }
        Ok(())
    }

    pub fn dump_string(&mut self) -> io::Result<String> {
        let mut s = Vec::new();
        self.write(&mut s)?;
        Ok(String::from_utf8_lossy(&s).into_owned())
    }

    pub fn write_block_with_inst(&mut self, block: BlockId, mut w: impl io::Write) -> io::Result<()> {
        self.indent(&mut w)?;
        block.write(self, &mut w)?;
        w.write_all(b":")?;

        let code = self.code;
        let data = code.block(block);
        if !data.preds.is_empty() {
            w.write_all(b" preds(")?;
            self.write_iter_with_delim(data.preds.iter().copied(), ", ", &mut w)?;
            w.write_all(b")")?;
        }
        if !data.succs.is_empty() {
            w.write_all(b" succs(")?;
            self.write_iter_with_delim(data.succs.iter().copied(), ", ", &mut w)?;
            w.write_all(b")")?;
        }
        if data.has_catch_handlers() {
            w.write_all(b" catch(")?;
            self.write_iter_with_delim(data.catch_successors(), ", ", &mut w)?;
            w.write_all(b")")?;
        }
        self.newline(&mut w)?;

        self.level += 1;
        for &phi in &data.phis {
            self.indent(&mut w)?;
            phi.write(self, &mut w)?;
            w.write_all(b" = phi ")?;
            let operands = code.dfg.phi_operands(phi).iter().copied();
            self.write_iter_with_delim(operands, ", ", &mut w)?;
            self.newline(&mut w)?;
        }
        for inst in code.layout.iter_inst(block) {
            self.indent(&mut w)?;
            inst.write(self, &mut w)?;
            self.newline(&mut w)?;
        }
        self.level -= 1;
        Ok(())
    }

    pub fn write_iter_with_delim<T>(
        &mut self,
        iter: impl Iterator<Item = T>,
        delim: &str,
        mut w: impl io::Write,
    ) -> io::Result<()>
    where
        T: IrWrite,
    {
        let mut iter = iter.peekable();
        while let Some(item) = iter.next() {
            item.write(self, &mut w)?;
            if iter.peek().is_some() {
                w.write_all(delim.as_bytes())?;
            }
        }
        Ok(())
    }

    pub fn indent(&self, mut w: impl io::Write) -> io::Result<()> {
        w.write_all(" ".repeat(self.level as usize * 4).as_bytes())
    }

    pub fn newline(&self, mut w: impl io::Write) -> io::Result<()> {
        w.write_all(b"\n")
    }
}

pub trait IrWrite {
    fn write(&self, writer: &mut IrWriter, w: &mut dyn io::Write) -> io::Result<()>;
}

impl IrWrite for BlockId {
    fn write(&self, writer: &mut IrWriter, w: &mut dyn io::Write) -> io::Result<()> {
        write!(w, "block{}", writer.code.block(*self).number)
    }
}

impl IrWrite for ValueId {
    fn write(&self, writer: &mut IrWriter, w: &mut dyn io::Write) -> io::Result<()> {
        write!(w, "v{}", writer.code.dfg.value(*self).number)
    }
}

impl IrWrite for InstId {
    fn write(&self, writer: &mut IrWriter, w: &mut dyn io::Write) -> io::Result<()> {
        let code = writer.code;
        let data = code.dfg.inst(*self);
        if let Some(result) = data.result() {
            result.write(writer, w)?;
            w.write_all(b" = ")?;
        }
        write!(w, "{}", data.kind)?;
        match &data.kind {
            InstKind::ConstNumber { value, .. } => write!(w, " {value}")?,
            InstKind::DebugPosition { line, .. } => write!(w, " {line}")?,
            _ => {}
        }
        if !data.args().is_empty() {
            w.write_all(b" ")?;
            writer.write_iter_with_delim(data.args().iter().copied(), ", ", &mut *w)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;
    use crate::{
        factory::DexItemFactory,
        inst::{BinopKind, NumericType},
        value::MoveType,
    };

    #[test]
    fn dump_blocks_and_phis() {
        let factory = DexItemFactory::new();
        let holder = factory.create_type("LTest;");
        let proto = factory.create_proto(factory.int_type, &[factory.int_type]);
        let mut code = IrCode::new(factory.create_method(holder, proto, "m"));
        let b0 = code.append_new_block();
        let b1 = code.append_new_block();
        let arg = code.append_inst(b0, InstKind::Argument, &[], Some(MoveType::Single));
        let arg = code.inst_result(arg).unwrap();
        let c = code.create_int_constant(3);
        code.layout.append_inst(c, b0);
        let c = code.inst_result(c).unwrap();
        code.append_inst(b0, InstKind::Goto, &[], None);
        code.link(b0, b1);
        let phi = code.create_phi(b1, MoveType::Single);
        code.dfg.append_phi_operand(phi, c);
        let add = InstKind::Binop {
            op: BinopKind::Add,
            ty: NumericType::Int,
        };
        let sum = code.append_inst(b1, add, &[arg, phi], Some(MoveType::Single));
        let sum = code.inst_result(sum).unwrap();
        code.append_inst(b1, InstKind::Return(Some(MoveType::Single)), &[sum], None);

        let dump = IrWriter::new(&code).dump_string().unwrap();
        assert_snapshot!(dump, @r"
        block0: succs(block1)
            v0 = argument
            v1 = const 3
            goto
        block1: preds(block0)
            v2 = phi v1
            v3 = add v0, v2
            return v3
        ");
    }
}
