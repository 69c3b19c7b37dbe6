use std::io::{self, Write};

use anyhow::{Context, Result};

use super::run::QueryResponse;

pub(super) fn write_json_response(response: &QueryResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, response)
        .context("failed to serialize query json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

pub(super) fn write_text_response(response: &QueryResponse) -> Result<()> {
    let retrieval = &response.retrieval;
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Query: {}", response.query)?;
    writeln!(
        output,
        "Retrieval: profile={} alpha={} alpha_keyword={} decay={} title_ratio={} offset={} limit={} attempts={} duration_ms={:.3}",
        retrieval.rank_profile,
        retrieval.hybrid_alpha,
        retrieval.hybrid_alpha_keyword,
        retrieval.doc_time_decay,
        retrieval.title_content_ratio,
        retrieval.offset,
        retrieval.num_returned_hits,
        retrieval.attempts,
        retrieval.query_duration_ms,
    )?;
    writeln!(output, "Access: {}", retrieval.access_control_list.join(", "))?;
    match (retrieval.rerank_requested, retrieval.rerank_degraded.as_deref()) {
        (false, _) => writeln!(output, "Rerank: skipped")?,
        (true, None) => writeln!(output, "Rerank: applied")?,
        (true, Some(reason)) => writeln!(output, "Rerank: degraded ({reason})")?,
    }
    writeln!(output, "Results: {}", response.returned)?;

    for hit in &response.hits {
        let title = if hit.title.is_empty() {
            "(untitled)"
        } else {
            &hit.title
        };
        writeln!(output, "{}.\t{}\t{}", hit.rank, hit.document_id, title)?;
        match hit.rerank_score {
            Some(rerank_score) => writeln!(
                output,
                "\tscore={:.6} rerank_score={:.6}",
                hit.score, rerank_score
            )?,
            None => writeln!(output, "\tscore={:.6}", hit.score)?,
        }
        if !hit.snippet.is_empty() {
            writeln!(output, "\t{}", preview(&hit.snippet, 160))?;
        }
    }

    output.flush()?;
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out = text.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}
