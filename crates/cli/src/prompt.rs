use std::io::{self, BufRead, Write};
use std::path::Path;

use async_trait::async_trait;
use trustbridge::{CollisionChoice, CollisionResolver};

/// Asks on the terminal for every folder collision. Anything other than an
/// explicit merge keeps both.
#[derive(Debug, Clone, Copy, Default)]
pub struct AskResolver;

pub fn parse_choice(answer: &str) -> CollisionChoice {
	match answer.trim().to_ascii_lowercase().as_str() {
		"m" | "merge" => CollisionChoice::UseExisting,
		_ => CollisionChoice::GenerateUniqueName,
	}
}

#[async_trait]
impl CollisionResolver for AskResolver {
	async fn resolve(&self, source: &Path, existing: &Path) -> CollisionChoice {
		let question = format!("folder {} already exists (incoming {}). [m]erge or [k]eep both? ", existing.display(), source.display());
		let answer = tokio::task::spawn_blocking(move || {
			let mut stderr = io::stderr().lock();
			let _ = write!(stderr, "{question}");
			let _ = stderr.flush();
			let mut line = String::new();
			io::stdin().lock().read_line(&mut line).map(|_| line)
		})
		.await;

		match answer {
			Ok(Ok(line)) => parse_choice(&line),
			_ => CollisionChoice::GenerateUniqueName,
		}
	}
}
