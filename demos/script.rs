use skiff::{parse, EvaluationContext};

fn main() -> anyhow::Result<()> {
    let program = vec![
        "(define (spam) (* eggs 3))",
        "(spam)",
        "(define eggs 20)",
        "(spam)",
        "(define (loop n acc) (if (= n 0) acc (loop (- n 1) (+ acc n))))",
        "(loop 100000 0)",
    ];

    for source in &program {
        let (ast, root) = parse(source)?;
        println!("read: {} ({} nodes)", ast.render(root), ast.len());
    }

    let mut context = EvaluationContext::new();
    for source in program {
        match context.evaluate_str(source) {
            Ok(value) => println!("{}: {} [{:?}]", source, value, context.last_stats()),
            Err(err) => println!("{}: {}", source, err)
        }
    }

    Ok(())
}
