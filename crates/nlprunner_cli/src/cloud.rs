//! Standalone `--cloud` operations (spec.md §4.4 "queued-mode bookkeeping"):
//! `--showqueue`, `--retrieve`, `--cancelrequest`, `--cancelall` talk
//! directly to a remote NLPRP endpoint rather than running a pipeline.

use anyhow::{bail, Context, Result};
use nlprunner_core::{CloudSection, NlpRunnerConfig};
use nlprunner_protocol::{Command, Request, Response};

pub struct CloudClient {
    client: reqwest::Client,
    base_url: String,
}

impl CloudClient {
    pub fn new(cloud: &CloudSection) -> Result<Self> {
        let client = reqwest::Client::builder().build().context("building HTTP client for --cloud operation")?;
        Ok(Self {
            client,
            base_url: cloud.base_url.clone(),
        })
    }

    async fn send(&self, command: Command) -> Result<Response<serde_json::Value>> {
        let request = Request::new(command);
        let response = self
            .client
            .post(format!("{}/nlprp", self.base_url))
            .json(&request)
            .send()
            .await
            .context("sending NLPRP request")?;
        response.json::<Response<serde_json::Value>>().await.context("decoding NLPRP response")
    }

    pub async fn show_queue(&self) -> Result<Response<serde_json::Value>> {
        self.send(Command::ShowQueue).await
    }

    pub async fn retrieve(&self) -> Result<Vec<Response<serde_json::Value>>> {
        let listed = self.show_queue().await?;
        let mut fetched = Vec::new();
        let Some(queue) = listed.payload.as_ref().and_then(|p| p.get("queue")).and_then(|q| q.as_array()) else {
            return Ok(fetched);
        };
        for entry in queue {
            let Some(queue_id) = entry.get("queue_id").and_then(|v| v.as_str()) else { continue };
            let response = self.send(Command::FetchFromQueue { queue_id: queue_id.to_string() }).await?;
            if response.is_ok() {
                self.send(Command::DeleteFromQueue { queue_id: Some(queue_id.to_string()) }).await?;
            }
            fetched.push(response);
        }
        Ok(fetched)
    }

    pub async fn cancel_request(&self, queue_id: &str) -> Result<Response<serde_json::Value>> {
        self.send(Command::DeleteFromQueue { queue_id: Some(queue_id.to_string()) }).await
    }

    pub async fn cancel_all(&self) -> Result<Response<serde_json::Value>> {
        self.send(Command::DeleteFromQueue { queue_id: None }).await
    }
}

/// Resolve the `[cloud:NAME]` section backing `nlpdef`'s first `remote`
/// processor binding.
pub fn resolve_cloud_section<'a>(config: &'a NlpRunnerConfig, nlpdef: &str) -> Result<&'a CloudSection> {
    let definition = config
        .nlp_definitions
        .get(nlpdef)
        .with_context(|| format!("unknown nlp definition '{nlpdef}'"))?;

    for binding in &definition.processors {
        let Some(sections) = config.processors.get(&binding.processor_name) else { continue };
        for section in sections {
            if section.processor_type != "remote" {
                continue;
            }
            let Some(cloud_name) = section.properties.get("cloud") else { continue };
            if let Some(cloud) = config.clouds.get(cloud_name) {
                return Ok(cloud);
            }
        }
    }

    bail!("nlp definition '{nlpdef}' has no 'remote'-type processor with a configured 'cloud' section")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load(ini: &str) -> NlpRunnerConfig {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ini.as_bytes()).unwrap();
        NlpRunnerConfig::load_from_file(file.path()).unwrap()
    }

    #[test]
    fn resolves_cloud_section_from_remote_processor_binding() {
        let config = load(
            "[database:sourcedb]\nurl = sqlite:./source.db\n\n\
             [input:notes]\nsource_db = sourcedb\nsource_table = notes\n\
             source_pk_field = id\nsource_text_field = body\n\n\
             [output:results]\ndatabase = sourcedb\n\n\
             [cloud:regional]\nbase_url = https://nlprp.example.org\nprocessor_name = medication_extractor\n\n\
             [processor:medication_extractor]\ntype = remote\ncloud = regional\n\n\
             [nlpdef:crp]\ninput = notes\noutput = results\nprocessors = medication_extractor\nhashphrase = secret\n",
        );

        let cloud = resolve_cloud_section(&config, "crp").unwrap();
        assert_eq!(cloud.name, "regional");
    }

    #[test]
    fn errors_when_nlpdef_has_no_remote_processor() {
        let config = load(
            "[database:sourcedb]\nurl = sqlite:./source.db\n\n\
             [input:notes]\nsource_db = sourcedb\nsource_table = notes\n\
             source_pk_field = id\nsource_text_field = body\n\n\
             [output:results]\ndatabase = sourcedb\n\n\
             [processor:crp_finder]\ntype = regex\n\n\
             [nlpdef:crp]\ninput = notes\noutput = results\nprocessors = crp_finder\nhashphrase = secret\n",
        );

        assert!(resolve_cloud_section(&config, "crp").is_err());
    }
}
