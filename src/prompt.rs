//! Prompt templates for answer generation and the self-reflection judge.

use crate::models::Chunk;

/// Fallback answer used when the generation service returns an empty but
/// successful response.
pub const NO_ANSWER: &str = "No answer generated.";

/// Build the answer prompt: all context chunks (in given order, each under
/// a numbered source label) followed by the question.
pub fn answer_prompt(question: &str, context_chunks: &[Chunk]) -> String {
    let context = context_chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[SOURCE {}]\n{}", i + 1, c.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are an assistant that answers questions based on the provided documents. \
         The context may include scattered but related passages. Analyze all of them, \
         combine relevant facts, and give a complete answer to the question.\n\n\
         IMPORTANT INSTRUCTIONS:\n\
         - Use ALL information from ALL provided sources\n\
         - List every feature, characteristic, or detail mentioned\n\
         - Do not skip any items or information\n\
         - If the question asks for features or characteristics, list them ALL\n\n\
         Context:\n{context}\n\n\
         Question: {question}\n\n\
         Complete Answer (include ALL details from context):"
    )
}

/// Build the sufficiency-judge prompt. The judge must answer starting with
/// "yes" or "no", followed by a short explanation.
pub fn sufficiency_prompt(query: &str, answer: &str) -> String {
    format!(
        "You are evaluating whether an answer fully addresses a question.\n\n\
         Question: {query}\n\n\
         Answer: {answer}\n\n\
         Does this answer fully address the question? Reply with \"yes\" or \"no\" \
         as the first word, then briefly explain why."
    )
}

/// Build the query-refinement prompt used when an answer was judged
/// insufficient.
pub fn refine_prompt(query: &str, answer: &str) -> String {
    format!(
        "The following question was answered incompletely.\n\n\
         Question: {query}\n\n\
         Incomplete answer: {answer}\n\n\
         Rewrite the question so that a document search is more likely to find \
         the missing information. Reply with only the rewritten question."
    )
}

/// Parse the judge's verdict: sufficiency means the response begins with
/// the affirmative token, case-insensitive. The remainder is kept as the
/// explanation.
pub fn parse_verdict(response: &str) -> (bool, String) {
    let trimmed = response.trim();
    let sufficient = trimmed
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .map(|first| first.eq_ignore_ascii_case("yes"))
        .unwrap_or(false);
    (sufficient, trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            page: 1,
            chunk_id: 0,
            source_file: "t.pdf".to_string(),
        }
    }

    #[test]
    fn answer_prompt_labels_sources_in_order() {
        let prompt = answer_prompt("What is X?", &[chunk("first"), chunk("second")]);
        assert!(prompt.contains("[SOURCE 1]\nfirst"));
        assert!(prompt.contains("[SOURCE 2]\nsecond"));
        assert!(prompt.find("first").unwrap() < prompt.find("second").unwrap());
        assert!(prompt.contains("Question: What is X?"));
    }

    #[test]
    fn verdict_yes_prefix_is_sufficient() {
        assert!(parse_verdict("Yes, the answer covers everything.").0);
        assert!(parse_verdict("YES.").0);
        assert!(parse_verdict("  yes — complete").0);
    }

    #[test]
    fn verdict_no_or_garbage_is_insufficient() {
        assert!(!parse_verdict("No, it misses the second part.").0);
        assert!(!parse_verdict("Maybe? yes").0);
        assert!(!parse_verdict("").0);
    }

    #[test]
    fn verdict_keeps_explanation() {
        let (ok, explanation) = parse_verdict("no - missing details");
        assert!(!ok);
        assert_eq!(explanation, "no - missing details");
    }
}
