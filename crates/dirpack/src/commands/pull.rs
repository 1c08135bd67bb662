use super::Context;
use crate::cli::PullArgs;
use dirpack_engine::{Metadata, PullOutcome, format_timestamp};
use tokio_util::sync::CancellationToken;

fn render(outcome: &PullOutcome, metadata: &Metadata) -> String {
    let mut lines = vec![
        format!("digest:   {}", outcome.digest),
        format!("source:   {}", metadata.source),
        format!("revision: {}", metadata.revision),
    ];
    if let Some(created) = metadata.created_at {
        lines.push(format!("created:  {}", format_timestamp(created)));
    }
    lines.push(format!(
        "extracted {} entries ({} bytes)",
        outcome.summary.entries, outcome.summary.bytes
    ));
    lines.join("\n")
}

pub async fn run(
    context: &Context,
    token: &CancellationToken,
    args: PullArgs,
) -> miette::Result<()> {
    let mut options = context.client_options();
    options.max_extract_size = args.max_size;
    let client = context.client(options);

    let outcome = client
        .pull_with_outcome(token, &args.reference, &args.output)
        .await?;
    let metadata = outcome.manifest.metadata()?;

    println!("{}", render(&outcome, &metadata));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirpack_engine::{CONTENT_MEDIA_TYPE, Descriptor, Digest, ExtractSummary, Manifest};

    #[test]
    fn test_render_lists_provenance() {
        let metadata = Metadata::new("github.com/org/repo", "abc123")
            .with_created_at(chrono::DateTime::from_timestamp(1_709_296_200, 0).unwrap());
        let manifest = Manifest {
            schema_version: 2,
            media_type: None,
            config: Descriptor::config(),
            layers: vec![Descriptor::for_bytes(CONTENT_MEDIA_TYPE, b"layer")],
            annotations: metadata.to_annotations(chrono::Utc::now()),
        };
        let digest = Digest::sha256(b"manifest");
        let outcome = PullOutcome {
            manifest,
            digest: digest.clone(),
            summary: ExtractSummary {
                entries: 3,
                bytes: 42,
            },
        };

        let rendered = render(&outcome, &outcome.manifest.metadata().unwrap());
        assert_eq!(
            rendered,
            format!(
                "digest:   {digest}\nsource:   github.com/org/repo\nrevision: abc123\n\
                 created:  2024-03-01T12:30:00Z\nextracted 3 entries (42 bytes)"
            )
        );
    }
}
