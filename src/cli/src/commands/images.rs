//! `skiff images` command.

use clap::Args;
use skiff_core::config::EngineConfig;
use skiff_core::error::SkiffError;
use skiff_image::StoredImage;

use crate::output::{self, NONE};

#[derive(Args)]
pub struct ImagesArgs {
    /// Only list the image this reference resolves to
    pub reference: Option<String>,

    /// Only show image IDs
    #[arg(short, long)]
    pub quiet: bool,

    /// Do not truncate IDs and digests
    #[arg(long)]
    pub no_trunc: bool,
}

pub async fn execute(args: ImagesArgs, config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_image_store(config)?;
    let mut images = store.list().await;

    if let Some(reference) = &args.reference {
        match store.lookup(reference).await {
            Ok(found) => images.retain(|img| img.id == found.id),
            Err(SkiffError::NotFound(_)) => images.clear(),
            Err(e) => return Err(e.into()),
        }
    }

    if args.quiet {
        for image in &images {
            println!("{}", output::display_id(&image.id, args.no_trunc));
        }
        return Ok(());
    }

    let mut table = output::new_table(&["REPOSITORY", "TAG", "IMAGE ID", "DIGEST", "SIZE", "CREATED"]);
    for image in &images {
        for row in ImageRow::from_stored(image, args.no_trunc) {
            table.add_row(&[
                &row.repository,
                &row.tag,
                &row.id,
                &row.digest,
                &row.size,
                &row.created,
            ]);
        }
    }

    println!("{table}");
    Ok(())
}

/// Pre-computed display fields for a single image row.
struct ImageRow {
    repository: String,
    tag: String,
    id: String,
    digest: String,
    size: String,
    created: String,
}

impl ImageRow {
    /// One row per tag; untagged images get a single `<none>` row named
    /// after the repository they were pulled from, if any.
    fn from_stored(image: &StoredImage, no_trunc: bool) -> Vec<Self> {
        let names: Vec<(String, String)> = if image.repo_tags.is_empty() {
            let repository = image
                .repo_digests
                .iter()
                .next()
                .and_then(|d| d.rsplit_once('@'))
                .map_or(NONE, |(repo, _)| repo);
            vec![(repository.to_string(), NONE.to_string())]
        } else {
            image
                .repo_tags
                .iter()
                .map(|t| {
                    let (repo, tag) = output::split_repo_tag(t);
                    (repo.to_string(), tag.to_string())
                })
                .collect()
        };

        let created = image
            .created
            .as_deref()
            .and_then(|c| chrono::DateTime::parse_from_rfc3339(c).ok())
            .map(|c| c.with_timezone(&chrono::Utc))
            .unwrap_or(image.pulled_at);

        names
            .into_iter()
            .map(|(repository, tag)| Self {
                repository,
                tag,
                id: output::display_id(&image.id, no_trunc).to_string(),
                digest: output::display_digest(image.manifest_digest.as_str(), no_trunc),
                size: output::format_bytes(image.size_bytes),
                created: output::format_ago(&created),
            })
            .collect()
    }
}
