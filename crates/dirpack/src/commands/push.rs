use super::Context;
use crate::cli::PushArgs;
use dirpack_engine::{IgnoreRules, Metadata, SOURCE_IGNORE_FILE, SymlinkPolicy};
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn ignore_rules(args: &PushArgs) -> dirpack_engine::Result<IgnoreRules> {
    let mut rules = if args.include_vcs {
        IgnoreRules::default()
    } else {
        IgnoreRules::vcs()
    };

    let ignore_file = args.path.join(SOURCE_IGNORE_FILE);
    if ignore_file.is_file() {
        debug!(path = %ignore_file.display(), "Loading ignore file");
        rules.extend(IgnoreRules::from_file(&ignore_file)?);
    }

    for pattern in &args.ignore_paths {
        rules.push(pattern.clone());
    }
    Ok(rules)
}

fn metadata(args: &PushArgs) -> Metadata {
    let mut metadata = Metadata::new(args.source.clone(), args.revision.clone());
    if let Some(created) = args.created {
        metadata = metadata.with_created_at(created);
    }
    for (key, value) in &args.annotations {
        metadata = metadata.with_annotation(key.clone(), value.clone());
    }
    metadata
}

const fn symlink_policy(args: &PushArgs) -> SymlinkPolicy {
    if args.follow_symlinks {
        SymlinkPolicy::Follow
    } else if args.skip_symlinks {
        SymlinkPolicy::Skip
    } else {
        SymlinkPolicy::Reject
    }
}

pub async fn run(
    context: &Context,
    token: &CancellationToken,
    args: PushArgs,
) -> miette::Result<()> {
    let mut options = context.client_options();
    options.symlink_policy = symlink_policy(&args);
    options.compression_level = args.compression_level;
    let client = context.client(options);

    let rules = ignore_rules(&args)?;
    let digest = client
        .push(token, &args.reference, &args.path, &metadata(&args), &rules)
        .await?;

    println!("{digest}");
    Ok(())
}
