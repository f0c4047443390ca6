use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt};
use skiff::EvaluationContext;

async fn query(stdout: &mut io::Stdout, lines: &mut io::Lines<io::BufReader<io::Stdin>>, pending: bool) -> io::Result<Option<String>> {
    let prompt: &[u8] = if pending { b"... " } else { b"> " };
    stdout.write_all(prompt).await?;
    stdout.flush().await?;
    lines.next_line().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut context = EvaluationContext::new();
    let mut lines = io::BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    // Expressions may span lines: the context buffers input until it closes
    while let Some(line) = query(&mut stdout, &mut lines, context.is_pending()).await? {
        for result in context.feed(&line) {
            match result {
                Ok(value) => println!("{}", value),
                Err(err) => println!("Error: {}", err),
            }
        }
    }

    Ok(())
}
