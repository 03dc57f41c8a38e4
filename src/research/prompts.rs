//! System prompts and prompt builders for each stage.

use std::fmt::Write as _;

pub const PLANNER_SYSTEM: &str = r#"You are an expert research planner. Analyze the research query and break it down into independent, non-overlapping research tasks. Each task must focus on one specific angle of the query and be answerable on its own.

Your output must be a JSON object with this structure:
{
    "query_analysis": "Key themes and areas the query touches",
    "context": "Background information relevant to the query",
    "tasks": ["Task 1 description", "Task 2 description"],
    "approach": "Overall approach to the research"
}

Tasks must be specific and actionable, and together they must cover what is needed to answer the query."#;

pub const RETRIEVER_SYSTEM: &str = r#"You are a research librarian. For the research task given, list the most relevant real sources you know of: reports, papers, datasets and reputable articles. Summarize what each source says that bears on the task.

Your output must be a JSON object with this structure:
{
    "search_queries": ["query used to find sources"],
    "sources": [
        {"title": "Source title", "author": "Author or organisation", "publication": "Publisher", "year": "Year", "url": "URL if known", "content": "What the source says about the task"}
    ],
    "key_points": ["Short key point"]
}

Only list sources you are confident exist. Leave the url empty rather than inventing one."#;

pub const ANALYZER_SYSTEM: &str = r#"You are an expert content analyst. Analyze the sources retrieved for a research task and extract distinct insights. Every insight must be supported by at least one of the numbered sources, referenced by its label such as "S1".

Your output must be a JSON object with this structure:
{
    "summary": "Concise summary of the findings",
    "key_insights": [
        {"insight": "Description of the insight", "sources": ["S1"], "confidence": "high|medium|low", "category": "trend|statistic|perspective|caveat"}
    ],
    "information_gaps": ["What the sources do not answer"]
}

Be critical: weigh source quality and note contradictions as separate insights."#;

pub const REPORT_SYSTEM: &str = r#"You are an expert research report writer. Synthesize the findings of several research tasks into one cohesive report that directly answers the research query.

Your output must be a JSON object with this structure:
{
    "summary": "Executive summary that answers the query",
    "sections": [
        {"heading": "Section heading", "body": "Section text in Markdown", "citations": ["S1", "S4"], "task": 1}
    ]
}

Write one section per research task, in task order, and set "task" to that task's number. Cite only the numbered sources provided, using their labels. Acknowledge uncertainty and disagreement between sources."#;

/// Appended to a prompt when the previous answer could not be parsed.
pub const FORMAT_REMINDER: &str = "Your previous answer could not be parsed. Reply again with ONLY the JSON object described in the instructions: no prose, no code fences, no trailing commas.";

/// Add the format reminder to a prompt for the single re-prompt attempt.
pub fn with_format_reminder(prompt: &str) -> String {
    format!("{}\n\n{}", prompt, FORMAT_REMINDER)
}

pub fn planning_prompt(query: &str, max_tasks: usize, prior_context: Option<&str>) -> String {
    let mut prompt = format!(
        "Research Query: {}\n\nPlan at most {} research tasks.",
        query, max_tasks
    );
    if let Some(context) = prior_context.filter(|c| !c.trim().is_empty()) {
        let _ = write!(
            prompt,
            "\n\nEarlier turns of this conversation:\n{}\n\nThose angles are already covered. Focus on new aspects or deeper analysis that complements the existing research.",
            context
        );
    }
    prompt
}

pub fn retrieval_prompt(goal: &str, context: &str, limit: usize) -> String {
    let mut prompt = format!("Research Task: {}\n\nList up to {} sources.", goal, limit);
    if !context.trim().is_empty() {
        let _ = write!(prompt, "\n\nResearch context: {}", context.trim());
    }
    prompt
}

/// One labelled excerpt handed to the analysis prompt.
pub struct Excerpt<'a> {
    pub label: String,
    pub title: &'a str,
    pub source_id: &'a str,
    pub text: String,
}

pub fn analysis_prompt(goal: &str, context: &str, excerpts: &[Excerpt<'_>]) -> String {
    let mut prompt = format!("Research Task: {}\n", goal);
    if !context.trim().is_empty() {
        let _ = writeln!(prompt, "\nContext: {}", context.trim());
    }
    prompt.push_str("\nRetrieved sources:\n");
    for excerpt in excerpts {
        let _ = write!(
            prompt,
            "\n[{}] {}\nURL: {}\n{}\n",
            excerpt.label, excerpt.title, excerpt.source_id, excerpt.text
        );
    }
    prompt.push_str("\nExtract the key insights for this task, citing sources by label.");
    prompt
}
