mod generate;
pub use generate::GenerateApp;

mod score;
pub use score::ScoreApp;
