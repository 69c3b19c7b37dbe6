use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::{CheckConfigArgs, ConfigOverrides};
use crate::params::EvalConfig;
use crate::util::expand_folder_template;

pub fn run(args: CheckConfigArgs) -> Result<()> {
    let config = EvalConfig::load(&args.config, &ConfigOverrides::default())?;

    info!(
        config = %args.config.display(),
        search_endpoint = %config.search.endpoint,
        reranker_endpoint = %config.reranker.as_ref().map(|value| value.endpoint.as_str()).unwrap_or_default(),
        eval_topk = config.params.eval_topk,
        num_returned_hits = config.params.num_returned_hits,
        "config is valid"
    );

    let mut output = io::BufWriter::new(io::stdout().lock());
    if args.json {
        serde_json::to_writer_pretty(&mut output, &config)
            .context("failed to serialize config json output")?;
        writeln!(output)?;
    } else {
        let params = &config.params;
        writeln!(output, "Config: {} (valid)", args.config.display())?;
        writeln!(
            output,
            "Weights: hybrid_alpha={} hybrid_alpha_keyword={} title_content_ratio={} doc_time_decay={}",
            params.hybrid_alpha,
            params.hybrid_alpha_keyword,
            params.title_content_ratio,
            params.doc_time_decay,
        )?;
        writeln!(
            output,
            "Retrieval: rank_profile={} offset={} num_returned_hits={} eval_topk={} skip_rerank={}",
            params.rank_profile.as_str(),
            params.offset,
            params.num_returned_hits,
            params.eval_topk,
            params.skip_rerank,
        )?;
        writeln!(
            output,
            "Access: {}",
            params.access_control_list().join(", ")
        )?;
        writeln!(
            output,
            "Export: {}",
            config
                .export
                .root
                .join(expand_folder_template(&config.export.folder, chrono::Utc::now()))
                .display()
        )?;
    }
    output.flush()?;
    Ok(())
}
