use crate::index::SearchHit;

pub const SYSTEM_PROMPT: &str = "You are an expert coding assistant. Your task is to help users with their question. \
Use the retrieved code context to inform your responses, but feel free to suggest better solutions if appropriate.";

const QUERY_PLACEHOLDER: &str = "{query}";
const CONTEXT_PLACEHOLDER: &str = "{code_context}";

const USER_TEMPLATE: &str = "Based on the user's query and the following code context, provide a helpful response. \
If improvements can be made, suggest them with explanations.

User Query: {query}

Retrieved Code Context:
{code_context}

Your response:";

/// `File: <path>` headed blocks separated by a blank line
#[inline]
pub fn format_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| format!("File: {}\n{}", hit.fragment.path, hit.fragment.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Fill the user prompt template. The context is substituted last so that
/// placeholder-looking text inside the query is left alone.
#[inline]
pub fn build_user_prompt(query: &str, context: &str) -> String {
    match USER_TEMPLATE.split_once(CONTEXT_PLACEHOLDER) {
        Some((head, tail)) => {
            format!("{}{context}{tail}", head.replacen(QUERY_PLACEHOLDER, query, 1))
        }
        None => USER_TEMPLATE.replacen(QUERY_PLACEHOLDER, query, 1),
    }
}
