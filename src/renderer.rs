//! Renders alert group notifications via tera templates.
//!
//! One template per delivery protocol, loaded once at startup from the paths
//! configured in [TemplateSettings]. Rendered output is assembled into a
//! message envelope by [envelope](crate::envelope).

use std::fmt;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use tera::Tera;
use thiserror::Error;

use crate::alert;

/// delivery protocols registered on the notification topic
///
/// `Default` must always be rendered, the broker falls back to it for
/// subscribers on protocols without their own entry in the envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Default,
    Email,
    Sms,
}

impl Protocol {
    /// every supported protocol, in envelope order
    pub const ALL: [Protocol; 3] = [Protocol::Default, Protocol::Email, Protocol::Sms];

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Default => "default",
            Protocol::Email => "email",
            Protocol::Sms => "sms",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// template file path per protocol
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSettings {
    pub default: String,
    pub email: String,
    pub sms: String,
}

impl TemplateSettings {
    fn path(&self, protocol: Protocol) -> &str {
        match protocol {
            Protocol::Default => &self.default,
            Protocol::Email => &self.email,
            Protocol::Sms => &self.sms,
        }
    }
}

/// the configured template for a protocol failed during substitution
#[derive(Debug, Error)]
#[error("failed to render {protocol} template: {source}")]
pub struct RenderError {
    pub protocol: Protocol,
    #[source]
    pub source: tera::Error,
}

/// Alert renderer. Holds the read-only template set, safe to share across
/// requests.
pub struct AlertRenderer {
    tera: Tera,
}

impl AlertRenderer {
    /// Loads the configured template file for every protocol. A missing or
    /// malformed template file is a startup failure.
    pub fn new(settings: &TemplateSettings) -> Result<Self> {
        let mut tera = Tera::default();

        for protocol in Protocol::ALL {
            tera.add_template_file(settings.path(protocol), Some(protocol.as_str()))
                .with_context(|| format!("could not load {protocol} template"))?;
        }

        Ok(AlertRenderer { tera })
    }

    /// renderer backed by in-memory templates, used by tests
    #[cfg(test)]
    pub(crate) fn from_raw_templates(templates: [(Protocol, &str); 3]) -> Result<Self> {
        let mut tera = Tera::default();

        for (protocol, template) in templates {
            tera.add_raw_template(protocol.as_str(), template)
                .with_context(|| format!("could not register {protocol} template"))?;
        }

        Ok(AlertRenderer { tera })
    }

    /// Renders `data` with the template configured for `protocol`.
    ///
    /// Deterministic: the same notification and template set always produce
    /// identical output. Referencing a field absent from the notification
    /// fails the render.
    pub fn render(&self, protocol: Protocol, data: &alert::Data) -> Result<String, RenderError> {
        let context = tera::Context::from_serialize(data)
            .map_err(|source| RenderError { protocol, source })?;

        self.tera
            .render(protocol.as_str(), &context)
            .map_err(|source| RenderError { protocol, source })
    }

    /// Renders `data` for every supported protocol in envelope order. The
    /// first failing protocol fails the whole set, a partial envelope is
    /// never produced.
    pub fn render_all(
        &self,
        data: &alert::Data,
    ) -> Result<indexmap::IndexMap<Protocol, String>, RenderError> {
        Protocol::ALL
            .iter()
            .map(|&protocol| Ok((protocol, self.render(protocol, data)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::parse;

    const TEMPLATES: [(Protocol, &str); 3] = [
        (
            Protocol::Default,
            "[{{ status | upper }}:{{ alerts | length }}] {{ commonLabels.alertname | default(value=\"\") }}",
        ),
        (
            Protocol::Email,
            "group {{ groupKey }} is {{ status }}, see {{ externalURL }}",
        ),
        (Protocol::Sms, "{{ status }}:{{ alerts | length }}"),
    ];

    fn notification() -> crate::alert::Data {
        parse(
            br#"{
                "version": "4",
                "groupKey": "group-1",
                "status": "firing",
                "receiver": "sns",
                "commonLabels": { "alertname": "HighCPU" },
                "externalURL": "http://am",
                "alerts": [
                    {
                        "status": "firing",
                        "startsAt": "2022-05-10T09:00:00Z",
                        "endsAt": "0001-01-01T00:00:00Z"
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn rendering_is_deterministic() {
        let renderer = AlertRenderer::from_raw_templates(TEMPLATES).unwrap();
        let data = notification();

        let first = renderer.render(Protocol::Email, &data).unwrap();
        let second = renderer.render(Protocol::Email, &data).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, "group group-1 is firing, see http://am");
    }

    #[test]
    fn render_all_covers_every_protocol_in_order() {
        let renderer = AlertRenderer::from_raw_templates(TEMPLATES).unwrap();

        let rendered = renderer.render_all(&notification()).unwrap();

        let protocols: Vec<Protocol> = rendered.keys().copied().collect();
        assert_eq!(protocols, Protocol::ALL);
        assert_eq!(rendered[&Protocol::Default], "[FIRING:1] HighCPU");
        assert_eq!(rendered[&Protocol::Sms], "firing:1");
    }

    #[test]
    fn undefined_field_fails_the_render() {
        let renderer = AlertRenderer::from_raw_templates([
            (Protocol::Default, "ok"),
            (Protocol::Email, "{{ no_such_field }}"),
            (Protocol::Sms, "ok"),
        ])
        .unwrap();

        let err = renderer.render_all(&notification()).unwrap_err();

        assert_eq!(err.protocol, Protocol::Email);
    }

    #[test]
    fn loads_templates_from_files() {
        use std::io::Write as _;

        let dir = tempfile::tempdir().unwrap();
        let mut settings = TemplateSettings {
            default: String::new(),
            email: String::new(),
            sms: String::new(),
        };

        for protocol in Protocol::ALL {
            let path = dir.path().join(format!("{protocol}.tpl"));
            let mut file = std::fs::File::create(&path).unwrap();
            write!(file, "{protocol}: {{{{ groupKey }}}}").unwrap();

            let path = path.to_str().unwrap().to_owned();
            match protocol {
                Protocol::Default => settings.default = path,
                Protocol::Email => settings.email = path,
                Protocol::Sms => settings.sms = path,
            }
        }

        let renderer = AlertRenderer::new(&settings).unwrap();

        let rendered = renderer.render(Protocol::Sms, &notification()).unwrap();
        assert_eq!(rendered, "sms: group-1");
    }

    #[test]
    fn missing_template_file_fails_startup() {
        let settings = TemplateSettings {
            default: String::from("/nonexistent/default.tpl"),
            email: String::from("/nonexistent/email.tpl"),
            sms: String::from("/nonexistent/sms.tpl"),
        };

        assert!(AlertRenderer::new(&settings).is_err());
    }
}
