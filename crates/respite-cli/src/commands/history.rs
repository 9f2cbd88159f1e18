use respite_core::BreakHistory;

pub fn run(limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let history = BreakHistory::open()?;
    let outcomes = history.recent(limit)?;
    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    Ok(())
}
