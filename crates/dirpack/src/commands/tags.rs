use super::Context;
use crate::cli::TagsArgs;
use tokio_util::sync::CancellationToken;

pub async fn run(
    context: &Context,
    token: &CancellationToken,
    args: TagsArgs,
) -> miette::Result<()> {
    let client = context.client(context.client_options());
    for tag in client.list_tags(token, &args.repository).await? {
        println!("{tag}");
    }
    Ok(())
}
