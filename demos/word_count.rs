//! Word frequency counter pipeline
//!
//! Reads lines from stdin, splits them into words with a flat-map-merge over
//! nested sources, cleans the words, counts frequencies in a custom sink
//! stage and prints the top-N words.
//!
//! Usage: cargo run --example word_count --release
//!        (Then type lines of text and press Ctrl-D to finish)

use demand_flow::{Sink, Source, Stage, StageContext, DEFAULT_BREADTH};
use std::collections::HashMap;
use std::io::{self, BufRead};
use tracing_subscriber::EnvFilter;

/// Sink stage that counts words and periodically prints the top words
struct WordCounterStage {
    counts: HashMap<String, usize>,
    seen: usize,
    batch_size: usize,
}

impl WordCounterStage {
    fn new() -> Self {
        Self {
            counts: HashMap::new(),
            seen: 0,
            batch_size: 100,
        }
    }

    fn print_top_n(&self, n: usize) {
        let mut items: Vec<_> = self.counts.iter().collect();
        items.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        println!("\n=== Top {} Words (after {} words) ===", n, self.seen);
        for (i, (word, count)) in items.into_iter().take(n).enumerate() {
            println!("{:2}. {} ({})", i + 1, word, count);
        }
    }
}

impl Stage for WordCounterStage {
    fn name(&self) -> &str {
        "word_counter"
    }

    fn on_start(&mut self, ctx: &mut StageContext<'_>) -> demand_flow::Result<()> {
        ctx.pull(0)
    }

    fn on_push(&mut self, ctx: &mut StageContext<'_>, inlet: usize) -> demand_flow::Result<()> {
        let word = ctx.grab_as::<String>(inlet)?;
        *self.counts.entry(word).or_insert(0) += 1;
        self.seen += 1;
        if self.seen % self.batch_size == 0 {
            self.print_top_n(10);
        }
        ctx.pull(inlet)
    }

    fn on_upstream_finish(
        &mut self,
        ctx: &mut StageContext<'_>,
        _inlet: usize,
    ) -> demand_flow::Result<()> {
        self.print_top_n(10);
        ctx.complete_stage();
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Word Frequency Counter Pipeline");
    println!("================================");
    println!("Enter lines of text (Ctrl-D to finish):");
    println!();

    let lines: Vec<String> = io::stdin().lock().lines().collect::<Result<_, _>>()?;

    Source::from_iter(lines)
        .flat_map_merge(DEFAULT_BREADTH, |line: String| {
            let words: Vec<String> = line.split_whitespace().map(str::to_lowercase).collect();
            Source::from_iter(words)
        })
        .map(|word| word.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|word| word.len() > 2)
        .run_with(Sink::from_stage(WordCounterStage::new()))
        .await?;

    println!("\n\nProcessing complete!");

    Ok(())
}
