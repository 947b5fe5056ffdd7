pub mod dag_progress;
pub mod icons;
pub mod progress;

pub use dag_progress::{DagUI, UiMode};
pub use progress::{OutcomePrinter, Spinner};
