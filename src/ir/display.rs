//! Pretty-printing for the IL (disassembly-style dump output).

use std::fmt;

use super::builder::IlMethod;

impl fmt::Display for IlMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.param_types.iter().map(ToString::to_string).collect();
        writeln!(f, "method {}({}) {{", self.name, params.join(", "))?;

        for (i, ty) in self.local_types.iter().enumerate() {
            writeln!(f, "  .local loc{i}: {ty}")?;
        }
        writeln!(f, "  ; max_stack = {}", self.max_stack_depth)?;

        for instr in &self.instrs {
            writeln!(f, "  {instr}")?;
        }

        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::super::builder::IlBuilder;
    use super::super::types::IlType;
    use super::*;

    #[test]
    fn dump_includes_locals_and_instrs() {
        let mut method = IlMethod::new("f", vec![IlType::I4]);
        let mut b = IlBuilder::new(&mut method);
        let l = b.define_local(IlType::I4, false);
        b.const_i4(3);
        b.store(l);
        drop(b);

        let text = method.to_string();
        assert!(text.contains("method f(i4)"));
        assert!(text.contains(".local loc0: i4"));
        assert!(text.contains("ldc.i4 3"));
        assert!(text.contains("stloc loc0"));
    }
}
