//! Image resolution helpers for the Scaleway backend.

use std::future::Future;

use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};

use crate::config::ScalewayConfig;

use super::super::{ScalewayBackend, ScalewayBackendError};

/// Image lookup parameters taken from the configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ImageQuery {
    pub(crate) label: String,
    pub(crate) arch: String,
    pub(crate) zone: String,
    pub(crate) project_id: String,
    pub(crate) organisation_id: Option<String>,
}

impl From<&ScalewayConfig> for ImageQuery {
    fn from(config: &ScalewayConfig) -> Self {
        Self {
            label: config.default_image.clone(),
            arch: config.default_architecture.clone(),
            zone: config.default_zone.clone(),
            project_id: config.default_project_id.clone(),
            organisation_id: config.default_organization_id.clone(),
        }
    }
}

impl ScalewayBackend {
    #[expect(
        clippy::excessive_nesting,
        reason = "organisation scoping requires nested builder updates before execution"
    )]
    pub(in crate::scaleway) async fn resolve_image_id(
        &self,
    ) -> Result<String, ScalewayBackendError> {
        let query = ImageQuery::from(&self.config);
        let scoped_query = &query;
        self.resolve_image_id_with(
            &query,
            || async move {
                if scoped_query.project_id.is_empty() {
                    Ok(Vec::new())
                } else {
                    let mut scoped =
                        ScalewayListInstanceImagesBuilder::new(self.api.clone(), &scoped_query.zone)
                            .public(true)
                            .project(&scoped_query.project_id)
                            .name(&scoped_query.label)
                            .arch(&scoped_query.arch);
                    if let Some(org) = &scoped_query.organisation_id {
                        scoped = scoped.organization(org);
                    }
                    scoped.run_async().await.map_err(ScalewayBackendError::from)
                }
            },
            || async move {
                ScalewayListInstanceImagesBuilder::new(self.api.clone(), &scoped_query.zone)
                    .public(true)
                    .name(&scoped_query.label)
                    .arch(&scoped_query.arch)
                    .run_async()
                    .await
                    .map_err(ScalewayBackendError::from)
            },
        )
        .await
    }

    /// Prefers project-scoped images and falls back to public ones only when
    /// the project has none.
    pub(in crate::scaleway) async fn resolve_image_id_with<FutA, FutB, FetchA, FetchB>(
        &self,
        query: &ImageQuery,
        project_fetch: FetchA,
        public_fetch: FetchB,
    ) -> Result<String, ScalewayBackendError>
    where
        FetchA: FnOnce() -> FutA,
        FetchB: FnOnce() -> FutB,
        FutA: Future<Output = Result<Vec<ScalewayImage>, ScalewayBackendError>>,
        FutB: Future<Output = Result<Vec<ScalewayImage>, ScalewayBackendError>>,
    {
        let project_images = project_fetch().await?;

        let public_images = if project_images.is_empty() {
            public_fetch().await?
        } else {
            Vec::new()
        };

        Self::select_image_from_sources(project_images, public_images, query)
    }

    pub(in crate::scaleway) fn select_image_id(
        mut candidates: Vec<ScalewayImage>,
        query: &ImageQuery,
    ) -> Result<String, ScalewayBackendError> {
        if candidates.is_empty() {
            return Err(ScalewayBackendError::ImageNotFound {
                label: query.label.clone(),
                arch: query.arch.clone(),
                zone: query.zone.clone(),
            });
        }
        candidates.sort_by(|lhs, rhs| rhs.creation_date.cmp(&lhs.creation_date));
        Ok(candidates.remove(0).id)
    }

    pub(in crate::scaleway) fn select_image_from_sources(
        project_images: Vec<ScalewayImage>,
        public_images: Vec<ScalewayImage>,
        query: &ImageQuery,
    ) -> Result<String, ScalewayBackendError> {
        let primary = if project_images.is_empty() {
            public_images
        } else {
            project_images
        };

        Self::select_image_id(Self::filter_images(primary, query), query)
    }

    pub(in crate::scaleway) fn filter_images(
        images: Vec<ScalewayImage>,
        query: &ImageQuery,
    ) -> Vec<ScalewayImage> {
        images
            .into_iter()
            .filter(|image| image.arch == query.arch)
            .filter(|image| image.state == "available")
            .collect()
    }
}
