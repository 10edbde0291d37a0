// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # poet-bench
//!
//! Multi-dimensional value scoring for AI research agents. Every task output
//! is scored along three dimensions and combined into one composite:
//!
//! - **Efficiency** (`eval::efficiency`): elapsed time and token cost against a
//!   human expert baseline
//! - **Quality** (`eval::quality`): precomputed rubric (RACE) and citation (FACT) scores
//! - **Strategic value** (`eval::strategic`): model-judged reasoning and
//!   knowledge capability, plus extraction of reusable knowledge
//!
//! Extracted insights accumulate in a persistent, indexed knowledge base
//! (`knowledge`) shared by all concurrently evaluated tasks. `batch` runs a
//! whole task set on a bounded worker pool with per-task failure isolation.
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use poet_bench::batch::{BatchCoordinator, ReportOptions, load_tasks};
//! use poet_bench::config::PoetConfig;
//! use poet_bench::knowledge::KnowledgeStore;
//! use poet_bench::llm::{OpenAiClient, TextGenerator};
//!
//! let config = PoetConfig::default();
//! let store = Arc::new(KnowledgeStore::open(&config.knowledge.path));
//! let generator: Arc<dyn TextGenerator> = Arc::new(OpenAiClient::new(config.llm.clone()));
//! let options = ReportOptions::from(&config.batch);
//!
//! let coordinator = BatchCoordinator::new(config, generator, store).unwrap();
//! let loaded = load_tasks("tasks.jsonl".as_ref(), None).unwrap();
//! let mut outcome = coordinator.run(&loaded.tasks, 4, None).unwrap();
//! outcome.record_rejected(loaded.rejected);
//! let report = outcome.report("my-model", &options);
//! println!("mean score: {:.3}", report.summary.mean_overall);
//! ```

pub mod aggregate;
pub mod batch;
pub mod config;
pub mod error;
pub mod eval;
pub mod knowledge;
pub mod llm;
