use super::Function;

impl Function {
    /// C source for this function with the signature
    /// `int name(const double** arg, double** res)`.
    ///
    /// Every work slot becomes a local array. Null input pointers read as
    /// zeros and null output pointers are skipped.
    pub fn generate_code(&self) -> String {
        let name: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let mut code = String::new();
        code.push_str(&format!("/* {} */\n", self));
        code.push_str(&format!("int {name}(const double** arg, double** res) {{\n"));
        code.push_str("  int i;\n");
        for (s, sp) in self.slots.iter().enumerate() {
            code.push_str(&format!("  double w{s}[{}];\n", sp.nnz().max(1)));
        }
        for (i, &s) in self.input_slots.iter().enumerate() {
            let n = self.slots[s].nnz();
            code.push_str(&format!(
                "  for (i=0; i<{n}; ++i) w{s}[i] = arg[{i}] ? arg[{i}][i] : 0;\n"
            ));
        }
        for ins in &self.instructions {
            let arg: Vec<String> = ins.args.iter().map(|s| format!("w{s}")).collect();
            let res: Vec<String> = ins
                .res
                .iter()
                .map(|r| r.map_or_else(|| "0".to_string(), |s| format!("w{s}")))
                .collect();
            ins.node.node().generate(&arg, &res, &mut code);
        }
        for (k, &s) in self.output_slots.iter().enumerate() {
            let n = self.slots[s].nnz();
            code.push_str(&format!(
                "  if (res[{k}]) for (i=0; i<{n}; ++i) res[{k}][i] = w{s}[i];\n"
            ));
        }
        code.push_str("  return 0;\n}\n");
        code
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::Expr;
    use crate::function::Function;

    #[test]
    fn split_function_emits_copy_loops() {
        let x = Expr::sym_vector("x", 3);
        let parts = x.vertsplit(&[0, 1, 3]).expect("split");
        let f = Function::new("tail", vec![x], vec![parts[1].clone()]).expect("function");
        let code = f.generate_code();
        assert!(code.contains("int tail(const double** arg, double** res) {"));
        assert!(code.contains("  for (i=0; i<3; ++i) w0[i] = arg[0] ? arg[0][i] : 0;\n"));
        // Only the second output of the split is required.
        assert!(code.contains("  for (i=0; i<2; ++i) w2[i] = w0[1+i];\n"));
        assert!(!code.contains("w1[i] = w0[0+i]"));
        assert!(code.contains("  if (res[0]) for (i=0; i<2; ++i) res[0][i] = w2[i];\n"));
    }

    #[test]
    fn elementwise_and_inner_product_statements() {
        let x = Expr::sym_vector("x", 2);
        let y = Expr::sym_scalar("y");
        let e = (&x * &y).sin().dot(&x).expect("dot");
        let f = Function::new("f", vec![x, y], vec![e]).expect("function");
        let code = f.generate_code();
        assert!(code.contains("w2[i] = w0[i]*w1[0];"));
        assert!(code.contains("w3[i] = sin(w2[i]);"));
        assert!(code.contains("w4[0] += w3[i]*w0[i];"));
    }
}
