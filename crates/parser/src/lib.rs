pub mod parser;

pub use parser::{parse_scenario, parse_scenarios, ParseError};
