/// Decide and evolve in one step, without persistence.
///
/// Runs `handle` and folds every produced event back into the aggregate. The
/// dispatcher uses it to stage several commands against one in-memory stream
/// before a single append; tests use it to drive aggregates directly.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: levy_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
