pub mod cat;
pub mod tail;

use std::io::{self, StdoutLock};

use clap::Args;
use kintail_core::config::OutputConfig;

use crate::format::Template;
use crate::output::{FieldSource, TemplateSink};

/// Output flags shared by `tail` and `cat`.
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Take template fields from each message parsed as a JSON object.
    #[arg(short, long)]
    pub json: bool,

    /// Line template with `%(field)s` placeholders, e.g. `%(timestamp)s %(message)s`.
    #[arg(short, long, value_name = "TEMPLATE")]
    pub format: Option<String>,

    /// Extra arguments passed to every `aws` invocation. Must come last.
    #[arg(long = "aws", value_name = "ARGS", num_args = 1.., allow_hyphen_values = true)]
    pub aws: Vec<String>,
}

impl OutputArgs {
    /// Flags win over the `[output]` config section.
    #[must_use]
    pub fn resolve(&self, config: &OutputConfig) -> (Template, FieldSource) {
        let template = Template::parse(self.format.as_deref().unwrap_or(&config.format));
        let source = if self.json || config.json {
            FieldSource::JsonMessage
        } else {
            FieldSource::Record
        };
        (template, source)
    }

    pub fn stdout_sink(&self, config: &OutputConfig) -> TemplateSink<StdoutLock<'static>> {
        let (template, source) = self.resolve(config);
        TemplateSink::new(io::stdout().lock(), template, source)
    }
}
