//! Prompt templates for the research society.

use crate::portal::{ResolutionRange, PORTAL_BROWSE_URL};
use crate::tools::ToolDescriptor;

/// Opening user turn for the initiator, whose history starts empty.
pub const KICKOFF_MESSAGE: &str =
    "Now start to give me instructions one by one. Only reply with Instruction and Input.";

/// Build the task prompt shared by both agents.
pub fn build_task_prompt(protein_type: &str, resolution: ResolutionRange) -> String {
    format!(
        r#"Task: Search and analyze protein tomograms from the CryoET Data Portal
URL: {url}

Search Term: {protein}
Resolution (voxel spacing, Å): {min} to {max}

Steps:
1. Search the portal for datasets matching "{protein}" within the resolution range
2. For the first 5 dataset results:
   - Extract the dataset title/name
   - Get the description
   - Note any visible metadata (authors, release date, number of runs)
   - Collect the dataset URL or id
3. Provide a summary of the findings, including:
   - Brief description of each dataset
   - Any common themes or patterns
   - Relevance to {protein} research

Please be thorough in data collection but focus only on the first 5 results."#,
        url = PORTAL_BROWSE_URL,
        protein = protein_type,
        min = resolution.min,
        max = resolution.max,
    )
}

/// System prompt for the agent that directs the work.
pub fn build_initiator_prompt(
    task_prompt: &str,
    initiator_name: &str,
    executor_name: &str,
    sentinel: &str,
) -> String {
    format!(
        r#"You are a {initiator}, working with a {executor} on a research task. Never forget your roles: you instruct, the {executor} carries out the work.

## The Task

{task}

## How to Collaborate

1. Give one instruction at a time, in the form:
   Instruction: <what to do>
   Input: <details, or None>
2. Base each new instruction on what the {executor} reported last. If a step failed, adjust the instruction instead of repeating it verbatim.
3. Do not perform the work yourself and do not invent results.
4. When the task is fully accomplished and the {executor} has delivered the final summary, reply with exactly: {sentinel}
   Never say {sentinel} before that."#,
        initiator = initiator_name,
        executor = executor_name,
        task = task_prompt,
        sentinel = sentinel,
    )
}

/// System prompt for the agent that uses the tools.
pub fn build_executor_prompt(
    task_prompt: &str,
    initiator_name: &str,
    executor_name: &str,
    tools: &[&ToolDescriptor],
) -> String {
    let tool_descriptions = if tools.is_empty() {
        "- (no tools available)".to_string()
    } else {
        tools
            .iter()
            .map(|t| format!("- **{}**: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"You are an {executor}, a specialized assistant for searching and analyzing protein tomograms from the CryoET Data Portal. You understand structural biology and can effectively navigate and extract information from scientific databases. A {initiator} gives you instructions one at a time.

## The Task

{task}

## Your Capabilities

You have access to the following tools:
{tools}

## Rules and Guidelines

1. **Use tools** - Don't guess. Use the tools to look up data and verify what you report.
2. **One instruction at a time** - Complete the current instruction, then report what you did and what you found.
3. **Handle errors** - If a tool fails, read the error, and either retry with corrected arguments or explain what went wrong.
4. **Downloads are expensive** - Only download a tomogram when the instruction explicitly asks for it, and never repeat a download that already succeeded.
5. **Be precise** - Quote dataset ids, names and numbers exactly as the tools return them.

Start every reply with:
Solution: <your solution and findings>"#,
        executor = executor_name,
        initiator = initiator_name,
        task = task_prompt,
        tools = tool_descriptions,
    )
}
