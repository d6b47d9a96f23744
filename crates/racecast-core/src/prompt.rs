//! Prompt compilation.
//!
//! The compiled prompt is the only contract the model sees, so it spells out
//! the identities to echo back, the divisions to cover, the exact output
//! shape and the formatting rules the repair pipeline would otherwise have to
//! clean up after.

use std::fmt::Write;

use crate::types::{CandidateRecord, CountyBaselineResult, RaceMetadata, ScenarioInput};

/// System prompt sent with every synthesis request.
pub const SYSTEM_PROMPT: &str = r#"
You are an election results simulator.

You produce plausible, internally consistent synthetic vote counts for a
hypothetical version of a real race. You are given the real baseline results
and a set of shifts to apply. You do not comment on real-world politics.

## Ground Rules
1. Identify candidates ONLY by the identity you are given for them
2. Vote counts are whole, non-negative integers
3. Candidate votes in each county must add up to that county's total
4. Respond with a single JSON object and nothing else
"#;

/// Output shape the model must return.
const OUTPUT_SCHEMA: &str = r#"{
  "race_summary": {
    "total_votes": 0,
    "turnout_change": 0.0,
    "winner_id": "identity of the winning candidate"
  },
  "candidates": [
    {
      "candidate_id": "identity exactly as given above",
      "candidate_name": "string",
      "party": "DEM | REP | IND | GRN | LIB | OTH",
      "votes": 0,
      "percentage": 0.0,
      "is_winner": false
    }
  ],
  "counties": [
    {
      "division_id": "division id exactly as given above",
      "division_name": "string",
      "total_votes": 0,
      "candidates": [
        { "candidate_id": "identity exactly as given above", "votes": 0 }
      ],
      "change_summary": "one sentence on how this county moved"
    }
  ],
  "summary": "two or three sentences describing the scenario outcome"
}"#;

/// Format a shift with an explicit sign.
fn signed(value: f64) -> String {
    format!("{:+.1}", value)
}

/// Compile the user prompt for one synthesis run.
///
/// Pure and deterministic: the same inputs always produce the same text.
pub fn compile_prompt(
    race: &RaceMetadata,
    candidates: &[CandidateRecord],
    baselines: &[CountyBaselineResult],
    scenario: &ScenarioInput,
) -> String {
    let mut out = String::with_capacity(4096);

    // Writing to a String cannot fail.
    let _ = write_race(&mut out, race, scenario);
    let _ = write_candidates(&mut out, candidates);
    let _ = write_counties(&mut out, baselines);
    let _ = write_scenario(&mut out, scenario);
    let _ = write_output_rules(&mut out, !baselines.is_empty());

    out
}

fn write_race(out: &mut String, race: &RaceMetadata, scenario: &ScenarioInput) -> std::fmt::Result {
    writeln!(out, "## Race")?;
    writeln!(out, "Scenario name: {}", scenario.name.trim())?;
    writeln!(out, "Race: {}", race.title)?;
    if let Some(office) = &race.office {
        writeln!(out, "Office: {}", office)?;
    }
    if let Some(jurisdiction) = &race.jurisdiction {
        writeln!(out, "Jurisdiction: {}", jurisdiction)?;
    }
    if let Some(date) = race.election_date {
        writeln!(out, "Election date: {}", date.format("%Y-%m-%d"))?;
    }
    if let Some(race_type) = &race.race_type {
        writeln!(out, "Race type: {}", race_type)?;
    }
    writeln!(out)
}

fn write_candidates(out: &mut String, candidates: &[CandidateRecord]) -> std::fmt::Result {
    writeln!(out, "## Candidates")?;
    writeln!(
        out,
        "Use ONLY the identity shown in brackets as candidate_id for each candidate. \
         Never use a name, never invent an identity, and include every candidate listed."
    )?;

    for candidate in candidates {
        write!(
            out,
            "- [{}] {} ({})",
            candidate.reference_key(),
            candidate.name,
            candidate.party
        )?;
        if candidate.identity.is_new() {
            write!(out, ", new candidate with no baseline results")?;
        } else {
            write!(
                out,
                ", baseline {} votes ({:.2}%)",
                candidate.votes, candidate.vote_percentage
            )?;
        }
        if candidate.incumbent {
            write!(out, ", incumbent")?;
        }
        writeln!(out)?;
    }
    writeln!(out)
}

fn write_counties(out: &mut String, baselines: &[CountyBaselineResult]) -> std::fmt::Result {
    writeln!(out, "## Counties")?;

    if baselines.is_empty() {
        writeln!(
            out,
            "No county baseline is available. Generate state-level results only \
             and return an empty \"counties\" array."
        )?;
        return writeln!(out);
    }

    writeln!(
        out,
        "Generate results for ALL of these {} counties, using the division id shown in brackets:",
        baselines.len()
    )?;
    for county in baselines {
        write!(
            out,
            "- [{}] {}: {} total votes, {}/{} precincts",
            county.division_id,
            county.division_name,
            county.total_votes,
            county.precincts_reporting,
            county.precincts_total
        )?;
        if !county.candidates.is_empty() {
            let breakdown: Vec<String> = county
                .candidates
                .iter()
                .map(|c| format!("{}={}", c.source_id, c.votes))
                .collect();
            write!(out, " ({})", breakdown.join(", "))?;
        }
        writeln!(out)?;
    }
    writeln!(out)
}

fn write_scenario(out: &mut String, scenario: &ScenarioInput) -> std::fmt::Result {
    writeln!(out, "## Scenario Shifts")?;
    writeln!(out, "Turnout shift: {}%", signed(scenario.turnout_shift))?;
    writeln!(out, "Republican shift: {} points", signed(scenario.republican_shift))?;
    writeln!(out, "Democratic shift: {} points", signed(scenario.democrat_shift))?;
    writeln!(
        out,
        "Independent/third-party shift: {} points",
        signed(scenario.independent_shift)
    )?;
    writeln!(
        out,
        "County strategy: {}. {}",
        scenario.county_strategy,
        scenario.county_strategy.description()
    )?;

    if let Some(instructions) = scenario.instructions() {
        writeln!(out)?;
        writeln!(out, "## Additional Instructions")?;
        writeln!(out, "{}", instructions)?;
    }
    writeln!(out)
}

fn write_output_rules(out: &mut String, has_counties: bool) -> std::fmt::Result {
    writeln!(out, "## Output Format (JSON)")?;
    writeln!(out, "{}", OUTPUT_SCHEMA)?;
    writeln!(out)?;
    writeln!(out, "## Formatting Rules")?;
    writeln!(out, "- Return valid JSON only, with no text before or after it")?;
    writeln!(out, "- Do not wrap the JSON in code fences")?;
    writeln!(out, "- Write numbers without thousands separators (805374, not 805,374)")?;
    writeln!(out, "- Do not leave trailing commas")?;
    if has_counties {
        writeln!(out, "- Include one entry in \"counties\" for every county listed above")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BaselineVotes, CountyStrategy, Party};

    fn race() -> RaceMetadata {
        let mut race = RaceMetadata::new("race-1", "Governor");
        race.jurisdiction = Some("Pennsylvania".into());
        race
    }

    fn candidates() -> Vec<CandidateRecord> {
        vec![
            CandidateRecord::existing("uuid-1", Some("src-1".into()), "Ada Lovelace", Party::Dem)
                .with_results(805_374, 51.2),
            CandidateRecord::existing("uuid-2", None, "Bob Stone", Party::Rep)
                .with_results(767_001, 48.8)
                .with_incumbent(true),
            CandidateRecord::new_candidate("Cy Rivers", Party::Ind),
        ]
    }

    fn baseline() -> Vec<CountyBaselineResult> {
        vec![CountyBaselineResult {
            division_id: "42001".into(),
            division_name: "Adams".into(),
            precincts_reporting: 10,
            precincts_total: 10,
            total_votes: 50_000,
            candidates: vec![BaselineVotes {
                source_id: "src-1".into(),
                votes: 20_000,
            }],
        }]
    }

    #[test]
    fn test_prompt_lists_every_reference_key() {
        let candidates = candidates();
        let prompt = compile_prompt(&race(), &candidates, &[], &ScenarioInput::new("S", "p"));

        for candidate in &candidates {
            assert!(prompt.contains(&format!("[{}]", candidate.reference_key())));
        }
        assert!(prompt.contains("Use ONLY the identity shown in brackets"));
        assert!(prompt.contains("new candidate with no baseline results"));
        assert!(prompt.contains("incumbent"));
    }

    #[test]
    fn test_prompt_lists_every_county() {
        let prompt = compile_prompt(&race(), &candidates(), &baseline(), &ScenarioInput::new("S", "p"));

        assert!(prompt.contains("ALL of these 1 counties"));
        assert!(prompt.contains("[42001] Adams"));
        assert!(prompt.contains("src-1=20000"));
        assert!(!prompt.contains("state-level results only"));
    }

    #[test]
    fn test_prompt_without_baseline_is_state_level() {
        let prompt = compile_prompt(&race(), &candidates(), &[], &ScenarioInput::new("S", "p"));
        assert!(prompt.contains("state-level results only"));
    }

    #[test]
    fn test_prompt_states_schema_and_formatting() {
        let prompt = compile_prompt(&race(), &candidates(), &[], &ScenarioInput::new("S", "p"));

        for field in ["\"race_summary\"", "\"candidates\"", "\"counties\"", "\"summary\""] {
            assert!(prompt.contains(field), "missing {}", field);
        }
        assert!(prompt.contains("without thousands separators"));
        assert!(prompt.contains("valid JSON only"));
        assert!(prompt.contains("code fences"));
    }

    #[test]
    fn test_prompt_renders_signed_shifts_and_strategy() {
        let mut scenario = ScenarioInput::new("Suburban swing", "p");
        scenario.turnout_shift = 5.0;
        scenario.republican_shift = -2.5;
        scenario.county_strategy = CountyStrategy::SuburbanFocus;
        scenario.custom_instructions = Some("  Assume a snowstorm in the west.  ".into());

        let prompt = compile_prompt(&race(), &candidates(), &[], &scenario);
        assert!(prompt.contains("Turnout shift: +5.0%"));
        assert!(prompt.contains("Republican shift: -2.5 points"));
        assert!(prompt.contains("Democratic shift: +0.0 points"));
        assert!(prompt.contains("suburban-focus"));
        assert!(prompt.contains(CountyStrategy::SuburbanFocus.description()));
        assert!(prompt.contains("Assume a snowstorm in the west."));
    }

    #[test]
    fn test_blank_instructions_omitted() {
        let mut scenario = ScenarioInput::new("S", "p");
        scenario.custom_instructions = Some("   ".into());
        let prompt = compile_prompt(&race(), &candidates(), &[], &scenario);
        assert!(!prompt.contains("Additional Instructions"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let candidates = candidates();
        let scenario = ScenarioInput::new("S", "p");
        assert_eq!(
            compile_prompt(&race(), &candidates, &baseline(), &scenario),
            compile_prompt(&race(), &candidates, &baseline(), &scenario)
        );
    }
}
