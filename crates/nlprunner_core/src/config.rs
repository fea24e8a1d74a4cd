//! INI config loader (spec.md §5): `[nlpdef:NAME]`, `[input:NAME]`,
//! `[processor:NAME]`, `[output:NAME]`, `[env:NAME]`, `[database:NAME]`,
//! `[cloud:NAME]` sections.

use crate::error::CoreError;
use crate::model::{ExtractorBinding, InputFieldSpec, NlpDefinition};
use ini::Ini;
use std::collections::HashMap;
use std::path::Path;

/// A `[database:NAME]` section: how to connect, resolved to a concrete URL.
#[derive(Debug, Clone)]
pub struct DatabaseSection {
    pub name: String,
    pub url: String,
}

/// An `[output:NAME]` section: where a processor's tables are written.
#[derive(Debug, Clone)]
pub struct OutputSection {
    pub name: String,
    pub database: String,
    pub max_rows_before_commit: usize,
    pub max_bytes_before_commit: usize,
}

/// A `[cloud:NAME]` section: a remote NLPRP endpoint's connection details.
#[derive(Debug, Clone)]
pub struct CloudSection {
    pub name: String,
    pub base_url: String,
    pub processor_name: String,
    pub max_records_per_request: usize,
    pub max_content_length: usize,
    pub rate_limit_hz: f64,
    pub max_tries: u32,
    pub stop_at_failure: bool,
}

/// A `[processor:NAME]` (or `[processor:NAME@VERSION]`) section: one
/// instantiable extractor. `processor_type` selects which concrete
/// `Extractor` the CLI's factory builds (`regex`, `coprocess`, `remote`);
/// the remaining properties are extractor-specific and read back out of
/// `properties` by that factory rather than parsed generically here, since
/// each extractor kind wants a different shape.
#[derive(Debug, Clone, Default)]
pub struct ProcessorSection {
    pub name: String,
    pub version: String,
    pub processor_type: String,
    pub is_default_version: bool,
    pub properties: HashMap<String, String>,
}

/// An `[env:NAME]` section: an environment variable group referenced by a
/// `[processor:NAME]` section's `env` key, applied to a launched
/// co-process (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct EnvSection {
    pub name: String,
    pub variables: HashMap<String, String>,
}

/// The fully parsed, secret-resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct NlpRunnerConfig {
    pub nlp_definitions: HashMap<String, NlpDefinition>,
    pub inputs: HashMap<String, InputFieldSpec>,
    pub databases: HashMap<String, DatabaseSection>,
    pub outputs: HashMap<String, OutputSection>,
    pub clouds: HashMap<String, CloudSection>,
    pub processors: HashMap<String, Vec<ProcessorSection>>,
    pub envs: HashMap<String, EnvSection>,
}

impl NlpRunnerConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let _ = dotenvy::dotenv();
        let ini = Ini::load_from_file(path.as_ref()).map_err(|e| CoreError::Config(e.to_string()))?;
        Self::from_ini(&ini)
    }

    pub fn from_ini(ini: &Ini) -> Result<Self, CoreError> {
        let mut config = Self::default();

        for (section_name, props) in ini.iter().filter_map(|(name, props)| name.map(|n| (n, props))) {
            let Some((kind, name)) = section_name.split_once(':') else { continue };

            match kind {
                "database" => {
                    let url = resolve_secret(get_required(props, "url", section_name)?)?;
                    config.databases.insert(
                        name.to_string(),
                        DatabaseSection { name: name.to_string(), url },
                    );
                }
                "input" => {
                    let copy_fields = props
                        .get("copy_fields")
                        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                        .unwrap_or_default();
                    config.inputs.insert(
                        name.to_string(),
                        InputFieldSpec {
                            input_name: name.to_string(),
                            source_db: get_required(props, "source_db", section_name)?.to_string(),
                            source_table: get_required(props, "source_table", section_name)?.to_string(),
                            source_pk_field: get_required(props, "source_pk_field", section_name)?.to_string(),
                            source_text_field: get_required(props, "source_text_field", section_name)?.to_string(),
                            copy_fields,
                            source_where: props.get("source_where").map(|s| s.to_string()),
                        },
                    );
                }
                "output" => {
                    config.outputs.insert(
                        name.to_string(),
                        OutputSection {
                            name: name.to_string(),
                            database: get_required(props, "database", section_name)?.to_string(),
                            max_rows_before_commit: parse_or(props.get("max_rows_before_commit"), 1000)?,
                            max_bytes_before_commit: parse_or(props.get("max_bytes_before_commit"), 8 * 1024 * 1024)?,
                        },
                    );
                }
                "cloud" => {
                    config.clouds.insert(
                        name.to_string(),
                        CloudSection {
                            name: name.to_string(),
                            base_url: get_required(props, "base_url", section_name)?.to_string(),
                            processor_name: get_required(props, "processor_name", section_name)?.to_string(),
                            max_records_per_request: parse_or(props.get("max_records_per_request"), 100)?,
                            max_content_length: parse_or(props.get("max_content_length"), 1_000_000)?,
                            rate_limit_hz: parse_or(props.get("rate_limit_hz"), 10.0)?,
                            max_tries: parse_or(props.get("max_tries"), 3)?,
                            stop_at_failure: parse_or(props.get("stop_at_failure"), false)?,
                        },
                    );
                }
                "nlpdef" => {
                    let processors = get_required(props, "processors", section_name)?
                        .split(',')
                        .map(|s| s.trim())
                        .filter(|s| !s.is_empty())
                        .map(|entry| match entry.split_once('@') {
                            Some((proc_name, version)) => ExtractorBinding {
                                processor_name: proc_name.to_string(),
                                processor_version: Some(version.to_string()),
                            },
                            None => ExtractorBinding {
                                processor_name: entry.to_string(),
                                processor_version: None,
                            },
                        })
                        .collect();

                    let hashphrase = resolve_secret(get_required(props, "hashphrase", section_name)?)?;

                    config.nlp_definitions.insert(
                        name.to_string(),
                        NlpDefinition {
                            name: name.to_string(),
                            input_name: get_required(props, "input", section_name)?.to_string(),
                            output_name: get_required(props, "output", section_name)?.to_string(),
                            processors,
                            hashphrase,
                            truncate_text_at: props.get("truncate_text_at").map(|v| v.parse()).transpose().map_err(|_| {
                                CoreError::Config(format!("{section_name}: truncate_text_at must be an integer"))
                            })?,
                            debug_row_limit: props.get("debug_row_limit").map(|v| v.parse()).transpose().map_err(|_| {
                                CoreError::Config(format!("{section_name}: debug_row_limit must be an integer"))
                            })?,
                        },
                    );
                }
                "processor" => {
                    let (proc_name, version) = match name.split_once('@') {
                        Some((n, v)) => (n.to_string(), v.to_string()),
                        None => (name.to_string(), "1.0".to_string()),
                    };
                    let processor_type = get_required(props, "type", section_name)?.to_string();
                    let explicit_default = props
                        .get("default")
                        .map(|v| v.parse::<bool>())
                        .transpose()
                        .map_err(|_| CoreError::Config(format!("{section_name}: 'default' must be true/false")))?;
                    let is_default_version = explicit_default.unwrap_or(!config.processors.contains_key(&proc_name));
                    let properties: HashMap<String, String> =
                        props.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();

                    config.processors.entry(proc_name.clone()).or_default().push(ProcessorSection {
                        name: proc_name,
                        version,
                        processor_type,
                        is_default_version,
                        properties,
                    });
                }
                "env" => {
                    let variables: HashMap<String, String> =
                        props.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
                    config.envs.insert(name.to_string(), EnvSection { name: name.to_string(), variables });
                }
                other => {
                    return Err(CoreError::Config(format!("unknown section kind '{other}' in [{section_name}]")));
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CoreError> {
        for def in self.nlp_definitions.values() {
            if !self.inputs.contains_key(&def.input_name) {
                return Err(CoreError::UnknownInput(def.name.clone(), def.input_name.clone()));
            }
            if !self.outputs.contains_key(&def.output_name) {
                return Err(CoreError::UnknownOutput(def.name.clone(), def.output_name.clone()));
            }
        }
        for input in self.inputs.values() {
            if !self.databases.contains_key(&input.source_db) {
                return Err(CoreError::UnknownDatabase(input.input_name.clone(), input.source_db.clone()));
            }
        }
        for output in self.outputs.values() {
            if !self.databases.contains_key(&output.database) {
                return Err(CoreError::UnknownDatabase(output.name.clone(), output.database.clone()));
            }
        }
        for def in self.nlp_definitions.values() {
            for binding in &def.processors {
                if !self.processors.contains_key(&binding.processor_name) {
                    return Err(CoreError::UnknownProcessor(def.name.clone(), binding.processor_name.clone()));
                }
            }
        }
        Ok(())
    }
}

fn get_required<'a>(props: &'a ini::Properties, key: &str, section: &str) -> Result<&'a str, CoreError> {
    props
        .get(key)
        .ok_or_else(|| CoreError::Config(format!("[{section}] missing required key '{key}'")))
}

fn parse_or<T: std::str::FromStr>(value: Option<&str>, default: T) -> Result<T, CoreError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| CoreError::Config(format!("could not parse '{raw}'"))),
    }
}

/// Resolve `@/path/to/file` (read the file, trim trailing newline) and
/// `$ENV_VAR` (read the environment variable) secret indirections
/// (spec.md §5 "secret indirection"). A value with neither prefix is
/// returned unchanged.
fn resolve_secret(raw: &str) -> Result<String, CoreError> {
    if let Some(path) = raw.strip_prefix('@') {
        std::fs::read_to_string(path)
            .map(|s| s.trim_end_matches(['\n', '\r']).to_string())
            .map_err(|e| CoreError::SecretResolution(raw.to_string(), e.to_string()))
    } else if let Some(var) = raw.strip_prefix('$') {
        std::env::var(var).map_err(|e| CoreError::SecretResolution(raw.to_string(), e.to_string()))
    } else {
        Ok(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_valid_config() {
        let file = write_ini(
            "[database:sourcedb]\nurl = sqlite:./source.db\n\n\
             [database:destdb]\nurl = sqlite:./dest.db\n\n\
             [input:notes]\nsource_db = sourcedb\nsource_table = notes\n\
             source_pk_field = id\nsource_text_field = body\n\n\
             [output:results]\ndatabase = destdb\n\n\
             [processor:crp_finder]\ntype = regex\n\n\
             [nlpdef:crp]\ninput = notes\noutput = results\nprocessors = crp_finder\nhashphrase = secret\n",
        );
        let config = NlpRunnerConfig::load_from_file(file.path()).unwrap();
        assert!(config.nlp_definitions.contains_key("crp"));
        assert_eq!(config.nlp_definitions["crp"].hashphrase, "secret");
        assert_eq!(config.processors["crp_finder"][0].processor_type, "regex");
    }

    #[test]
    fn rejects_nlpdef_with_unknown_processor() {
        let file = write_ini(
            "[database:sourcedb]\nurl = sqlite:./source.db\n\n\
             [input:notes]\nsource_db = sourcedb\nsource_table = notes\n\
             source_pk_field = id\nsource_text_field = body\n\n\
             [output:results]\ndatabase = sourcedb\n\n\
             [nlpdef:crp]\ninput = notes\noutput = results\nprocessors = crp_finder\nhashphrase = secret\n",
        );
        let result = NlpRunnerConfig::load_from_file(file.path());
        assert!(matches!(result, Err(CoreError::UnknownProcessor(_, _))));
    }

    #[test]
    fn rejects_nlpdef_with_unknown_input() {
        let file = write_ini(
            "[database:sourcedb]\nurl = sqlite:./source.db\n\n\
             [output:results]\ndatabase = sourcedb\n\n\
             [nlpdef:crp]\ninput = missing_input\noutput = results\nprocessors = crp_finder\nhashphrase = secret\n",
        );
        let result = NlpRunnerConfig::load_from_file(file.path());
        assert!(matches!(result, Err(CoreError::UnknownInput(_, _))));
    }

    #[test]
    fn rejects_nlpdef_with_unknown_output() {
        let file = write_ini(
            "[database:sourcedb]\nurl = sqlite:./source.db\n\n\
             [input:notes]\nsource_db = sourcedb\nsource_table = notes\n\
             source_pk_field = id\nsource_text_field = body\n\n\
             [processor:crp_finder]\ntype = regex\n\n\
             [nlpdef:crp]\ninput = notes\noutput = missing_output\nprocessors = crp_finder\nhashphrase = secret\n",
        );
        let result = NlpRunnerConfig::load_from_file(file.path());
        assert!(matches!(result, Err(CoreError::UnknownOutput(_, _))));
    }

    #[test]
    fn parses_processor_bindings_with_pinned_versions() {
        let file = write_ini(
            "[database:sourcedb]\nurl = sqlite:./source.db\n\n\
             [input:notes]\nsource_db = sourcedb\nsource_table = notes\n\
             source_pk_field = id\nsource_text_field = body\n\n\
             [output:results]\ndatabase = sourcedb\n\n\
             [processor:crp_finder@2.0]\ntype = regex\n\n\
             [processor:mmse_finder]\ntype = regex\n\n\
             [nlpdef:crp]\ninput = notes\noutput = results\nprocessors = crp_finder@2.0, mmse_finder\nhashphrase = secret\n",
        );
        let config = NlpRunnerConfig::load_from_file(file.path()).unwrap();
        let processors = &config.nlp_definitions["crp"].processors;
        assert_eq!(processors[0].processor_name, "crp_finder");
        assert_eq!(processors[0].processor_version.as_deref(), Some("2.0"));
        assert_eq!(processors[1].processor_name, "mmse_finder");
        assert_eq!(processors[1].processor_version, None);
    }

    #[test]
    fn resolves_env_var_secret_indirection() {
        std::env::set_var("NLPRUNNER_TEST_HASHPHRASE", "from-env");
        let file = write_ini(
            "[database:sourcedb]\nurl = sqlite:./source.db\n\n\
             [input:notes]\nsource_db = sourcedb\nsource_table = notes\n\
             source_pk_field = id\nsource_text_field = body\n\n\
             [output:results]\ndatabase = sourcedb\n\n\
             [processor:crp_finder]\ntype = regex\n\n\
             [nlpdef:crp]\ninput = notes\noutput = results\nprocessors = crp_finder\nhashphrase = $NLPRUNNER_TEST_HASHPHRASE\n",
        );
        let config = NlpRunnerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.nlp_definitions["crp"].hashphrase, "from-env");
        std::env::remove_var("NLPRUNNER_TEST_HASHPHRASE");
    }
}
