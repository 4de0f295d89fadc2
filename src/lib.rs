//! Latent Dirichlet allocation by collapsed Gibbs sampling, with the
//! Dirichlet hyperparameters re-estimated while sampling.
//!
//! ```no_run
//! use tilda::{Corpus, Estimator, Settings};
//!
//! let corpus = Corpus::load_text("corpus.txt")?;
//! let settings = Settings {
//!     num_topics: 20,
//!     ..Settings::default()
//! };
//! let mut estimator = Estimator::new(&corpus, settings)?;
//! let model = estimator.run(&mut ())?;
//! println!("alpha = {:?}", model.alpha);
//! # Ok::<(), tilda::LdaError>(())
//! ```

pub mod corpus;
pub mod count_model;
pub mod error;
pub mod math;
pub mod report;
pub mod sampler;
pub mod settings;

pub use corpus::{Corpus, Vocabulary};
pub use count_model::CountModel;
pub use error::{LdaError, Result};
pub use report::{Checkpoint, FileReporter, ModelView, Reporter};
pub use sampler::{Estimator, FittedModel, Phase};
pub use settings::{OutputFiles, PriorFlags, Settings};
