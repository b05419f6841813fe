use super::models::SearchResult;

const ENTRY_SEPARATOR: &str = "\n\n";

/// Joins ranked results into one prompt context of at most `max_chars`
/// characters.
///
/// Entries are appended in rank order and never cut; the first entry that
/// would overflow the budget ends the context.
#[inline]
pub fn build_context(results: &[SearchResult], max_chars: usize) -> String {
    let mut context = String::new();
    let mut used = 0;

    for (position, result) in results.iter().enumerate() {
        let entry = format_entry(position + 1, result);
        let separator = if context.is_empty() { "" } else { ENTRY_SEPARATOR };
        let needed = separator.chars().count() + entry.chars().count();

        if used + needed > max_chars {
            break;
        }

        context.push_str(separator);
        context.push_str(&entry);
        used += needed;
    }

    context
}

fn format_entry(number: usize, result: &SearchResult) -> String {
    let relevance = (result.score * 100.0).round();
    format!(
        "[{number}] From \"{}\" (Relevance: {relevance}%)\n{}",
        result.document_name, result.content
    )
}
