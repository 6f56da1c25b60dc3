pub mod cli;
pub mod content;
pub mod logging;

pub mod util {
    pub mod env;
}

pub use content::record::{Payload, QuestionKind, QuestionRecord};
pub use content::store::{ContentStore, StoreConfig};
