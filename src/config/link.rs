use super::LinkSettings;

/// Immutable link configuration.
///
/// Built once with the `with_*` methods and then shared (behind an `Arc`)
/// by the connection manager, publisher and consumer. There are no setters
/// on a built value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    address: String,
    topic_prefix: String,
    exchange: String,
    content_type: String,
    mandatory: bool,
    immediate: bool,
    consumer_tag: Option<String>,
}

impl LinkConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            topic_prefix: String::new(),
            exchange: "amq.topic".to_string(),
            content_type: "application/json".to_string(),
            mandatory: false,
            immediate: false,
            consumer_tag: None,
        }
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }

    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    /// Fixed consumer tag. Without one, the consumer generates a unique tag.
    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = Some(tag.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn immediate(&self) -> bool {
        self.immediate
    }

    pub fn consumer_tag(&self) -> Option<&str> {
        self.consumer_tag.as_deref()
    }
}

impl From<&LinkSettings> for LinkConfig {
    fn from(settings: &LinkSettings) -> Self {
        LinkConfig::new(settings.address.clone())
            .with_topic_prefix(settings.topic_prefix.clone())
            .with_exchange(settings.exchange.clone())
            .with_content_type(settings.content_type.clone())
            .with_mandatory(settings.mandatory)
            .with_immediate(settings.immediate)
    }
}
