use crate::config::{fill_count, require_count_token};
use crate::models::{Quad, Term};
use anyhow::Result;
use serde::Deserialize;

/// Which `.meta` generator to use, as written in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MetadataConfig {
    #[serde(rename_all = "camelCase")]
    DerivedResource {
        derived_namespace: String,
        meta_filename: String,
        templates_template: String,
    },
    #[serde(rename_all = "camelCase")]
    Template {
        derived_namespace: String,
        meta_filename: String,
        templates_template: String,
        variable_template: String,
    },
}

impl MetadataConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            MetadataConfig::DerivedResource {
                templates_template, ..
            } => require_count_token("metadata.templatesTemplate", templates_template),
            MetadataConfig::Template {
                templates_template,
                variable_template,
                ..
            } => {
                require_count_token("metadata.templatesTemplate", templates_template)?;
                require_count_token("metadata.variableTemplate", variable_template)
            }
        }
    }

    pub fn build(&self) -> Result<Box<dyn MetadataGenerator>> {
        self.validate()?;
        Ok(match self.clone() {
            MetadataConfig::DerivedResource {
                derived_namespace,
                meta_filename,
                templates_template,
            } => Box::new(DerivedResourceMetadata {
                namespace: derived_namespace,
                meta_filename,
                templates_template,
            }),
            MetadataConfig::Template {
                derived_namespace,
                meta_filename,
                templates_template,
                variable_template,
            } => Box::new(TemplateMetadata {
                namespace: derived_namespace,
                meta_filename,
                templates_template,
                variable_template,
            }),
        })
    }
}

/// What a generator needs to describe one dataset's derived resources.
#[derive(Debug, Clone)]
pub struct MetadataInput<'a> {
    pub pod_uri: &'a str,
    pub selector_patterns: &'a [String],
    pub filter_filename_template: &'a str,
    pub n_resources: usize,
}

/// Produces the statements of a dataset's `.meta` file.
pub trait MetadataGenerator: Send + Sync {
    fn generate_metadata(&self, input: &MetadataInput<'_>) -> Vec<Quad>;

    /// Appended to the dataset id to form the metadata target.
    fn meta_file_name(&self) -> &str;
}

/// Describes resources `0..n` with a fixed template per resource.
pub struct DerivedResourceMetadata {
    namespace: String,
    meta_filename: String,
    templates_template: String,
}

/// Describes resources `1..=n`; resource `i` takes `i` path variables.
pub struct TemplateMetadata {
    namespace: String,
    meta_filename: String,
    templates_template: String,
    variable_template: String,
}

fn describe(
    quads: &mut Vec<Quad>,
    namespace: &str,
    input: &MetadataInput<'_>,
    index: usize,
    template: String,
) {
    let pod = Term::iri(input.pod_uri);
    let descriptor = Term::blank(format!("derived{}", index));
    let predicate = |local: &str| Term::iri(format!("{}{}", namespace, local));

    quads.push(Quad::new(pod, predicate("derivedResource"), descriptor.clone()));
    quads.push(Quad::new(
        descriptor.clone(),
        predicate("template"),
        Term::literal(template),
    ));
    for selector in input.selector_patterns {
        quads.push(Quad::new(
            descriptor.clone(),
            predicate("selector"),
            Term::iri(selector),
        ));
    }
    let filter = format!(
        "{}{}",
        input.pod_uri,
        fill_count(input.filter_filename_template, index)
    );
    quads.push(Quad::new(descriptor, predicate("filter"), Term::iri(filter)));
}

impl MetadataGenerator for DerivedResourceMetadata {
    fn generate_metadata(&self, input: &MetadataInput<'_>) -> Vec<Quad> {
        let mut quads = Vec::new();
        for i in 0..input.n_resources {
            let template = fill_count(&self.templates_template, i);
            describe(&mut quads, &self.namespace, input, i, template);
        }
        quads
    }

    fn meta_file_name(&self) -> &str {
        &self.meta_filename
    }
}

impl MetadataGenerator for TemplateMetadata {
    fn generate_metadata(&self, input: &MetadataInput<'_>) -> Vec<Quad> {
        let mut quads = Vec::new();
        for i in 1..=input.n_resources {
            let mut template = fill_count(&self.templates_template, i);
            let segments: Vec<String> = (1..=i)
                .map(|v| format!("{{{}}}", fill_count(&self.variable_template, v)))
                .collect();
            if !template.ends_with('/') {
                template.push('/');
            }
            template.push_str(&segments.join("/"));
            describe(&mut quads, &self.namespace, input, i, template);
        }
        quads
    }

    fn meta_file_name(&self) -> &str {
        &self.meta_filename
    }
}
