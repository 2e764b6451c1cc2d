//! Bucket notification configuration
//!
//! A bucket's notification configuration maps destination ARNs (queues,
//! topics, cloud functions) to the events and key filters they subscribe to.
//! Listener configurations describe live streaming sessions and the node
//! that holds each session's connection.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::event::EventType;
use super::filter::{FilterRule, KeyFilter};
use crate::error::{Error, Result};

// ============================================================================
// Event Descriptors
// ============================================================================

/// A destination's subscription: events plus key filter rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    /// Configuration ID, echoed in delivered records
    pub id: String,
    /// Destination ARN, unique within a bucket
    pub destination_id: String,
    /// Subscribed event types
    pub events: Vec<EventType>,
    /// Key filter rules
    #[serde(default)]
    pub filter: KeyFilter,
}

impl EventDescriptor {
    pub fn new(
        id: impl Into<String>,
        destination_id: impl Into<String>,
        events: Vec<EventType>,
        filter: KeyFilter,
    ) -> Self {
        Self {
            id: id.into(),
            destination_id: destination_id.into(),
            events,
            filter,
        }
    }

    /// Whether an event of `event_type` on `key` should be delivered here
    pub fn matches(&self, event_type: &EventType, key: &str) -> bool {
        self.events.iter().any(|e| e.matches(event_type)) && self.filter.matches(key)
    }

    pub fn validate(&self) -> Result<()> {
        validate_arn(&self.destination_id)?;
        if self.events.is_empty() {
            return Err(Error::MissingEvents);
        }
        self.filter.validate()
    }
}

/// Validate the shape of a destination ARN:
/// `arn:<partition>:<service>:<region>:<account>:<resource>`
pub fn validate_arn(arn: &str) -> Result<()> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() != 6 || parts[0] != "arn" {
        return Err(Error::InvalidArn(arn.to_string()));
    }
    if parts[1].is_empty() || parts[2].is_empty() || parts[5].is_empty() {
        return Err(Error::InvalidArn(arn.to_string()));
    }
    Ok(())
}

// ============================================================================
// Notification Configuration
// ============================================================================

/// Complete bucket notification configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfiguration {
    #[serde(default)]
    pub queue_configurations: Vec<EventDescriptor>,
    #[serde(default)]
    pub topic_configurations: Vec<EventDescriptor>,
    #[serde(default)]
    pub cloud_function_configurations: Vec<EventDescriptor>,
}

impl NotificationConfiguration {
    /// Create empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_queue(mut self, descriptor: EventDescriptor) -> Self {
        self.queue_configurations.push(descriptor);
        self
    }

    pub fn add_topic(mut self, descriptor: EventDescriptor) -> Self {
        self.topic_configurations.push(descriptor);
        self
    }

    pub fn add_cloud_function(mut self, descriptor: EventDescriptor) -> Self {
        self.cloud_function_configurations.push(descriptor);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.queue_configurations.is_empty()
            && self.topic_configurations.is_empty()
            && self.cloud_function_configurations.is_empty()
    }

    /// All descriptors regardless of destination kind
    pub fn descriptors(&self) -> impl Iterator<Item = &EventDescriptor> {
        self.queue_configurations
            .iter()
            .chain(self.topic_configurations.iter())
            .chain(self.cloud_function_configurations.iter())
    }

    /// Look up the descriptor for a destination
    pub fn descriptor(&self, destination_id: &str) -> Option<&EventDescriptor> {
        self.descriptors()
            .find(|d| d.destination_id == destination_id)
    }

    /// Descriptors that should receive an event of `event_type` on `key`
    pub fn matching<'a>(
        &'a self,
        event_type: &'a EventType,
        key: &'a str,
    ) -> impl Iterator<Item = &'a EventDescriptor> + 'a {
        self.descriptors().filter(move |d| d.matches(event_type, key))
    }

    /// Validate every descriptor and reject duplicate destinations
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for descriptor in self.descriptors() {
            descriptor.validate()?;
            if !seen.insert(descriptor.destination_id.as_str()) {
                return Err(Error::DuplicateDestination(
                    descriptor.destination_id.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Parse from S3 `NotificationConfiguration` XML
    pub fn from_xml(xml: &str) -> Result<Self> {
        let doc: xml::NotificationConfigurationXml = quick_xml::de::from_str(xml)
            .map_err(|e| Error::MalformedXML(format!("Invalid notification XML: {}", e)))?;

        Ok(Self {
            queue_configurations: doc
                .queues
                .into_iter()
                .map(|d| d.into_descriptor(|d| d.queue.take(), "Queue"))
                .collect::<Result<_>>()?,
            topic_configurations: doc
                .topics
                .into_iter()
                .map(|d| d.into_descriptor(|d| d.topic.take(), "Topic"))
                .collect::<Result<_>>()?,
            cloud_function_configurations: doc
                .cloud_functions
                .into_iter()
                .map(|d| d.into_descriptor(|d| d.cloud_function.take(), "CloudFunction"))
                .collect::<Result<_>>()?,
        })
    }

    /// Serialize to S3 `NotificationConfiguration` XML
    pub fn to_xml(&self) -> Result<String> {
        let doc = xml::NotificationConfigurationXml {
            xmlns: Some(xml::S3_XMLNS.to_string()),
            queues: self
                .queue_configurations
                .iter()
                .map(|d| xml::DestinationXml::from_descriptor(d, xml::Kind::Queue))
                .collect(),
            topics: self
                .topic_configurations
                .iter()
                .map(|d| xml::DestinationXml::from_descriptor(d, xml::Kind::Topic))
                .collect(),
            cloud_functions: self
                .cloud_function_configurations
                .iter()
                .map(|d| xml::DestinationXml::from_descriptor(d, xml::Kind::CloudFunction))
                .collect(),
        };

        let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        out.push('\n');
        let body = quick_xml::se::to_string(&doc)
            .map_err(|e| Error::InternalError(format!("Failed to serialize notification: {}", e)))?;
        out.push_str(&body);
        Ok(out)
    }
}

// ============================================================================
// Listener Configuration
// ============================================================================

/// A live streaming session registered on a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub descriptor: EventDescriptor,
    /// Address of the node holding the client connection
    pub target_node: String,
}

impl ListenerConfig {
    pub fn new(descriptor: EventDescriptor, target_node: impl Into<String>) -> Self {
        Self {
            descriptor,
            target_node: target_node.into(),
        }
    }

    pub fn destination_id(&self) -> &str {
        &self.descriptor.destination_id
    }
}

/// Parsed listen request: the filter and events a streaming client asks for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenRequest {
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
    pub events: Vec<String>,
}

impl ListenRequest {
    /// Parse from query pairs (`prefix`, `suffix` and `events` may repeat)
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut request = Self::default();
        for (key, value) in pairs {
            match key.as_ref() {
                "prefix" => request.prefixes.push(value.into()),
                "suffix" => request.suffixes.push(value.into()),
                "events" => request.events.push(value.into()),
                _ => {}
            }
        }
        request
    }

    /// Validate in request order (prefixes, suffixes, events) and build the
    /// event list and key filter.
    pub fn validate(&self) -> Result<(Vec<EventType>, KeyFilter)> {
        super::filter::validate_filter_values(&self.prefixes)?;
        super::filter::validate_filter_values(&self.suffixes)?;

        let events = self
            .events
            .iter()
            .map(|e| e.parse::<EventType>())
            .collect::<Result<Vec<_>>>()?;
        if events.is_empty() {
            return Err(Error::MissingEvents);
        }

        let rules = self
            .prefixes
            .iter()
            .map(FilterRule::prefix)
            .chain(self.suffixes.iter().map(FilterRule::suffix))
            .collect();

        Ok((events, KeyFilter { rules }))
    }
}

// ============================================================================
// XML wire shapes
// ============================================================================

mod xml {
    use serde::{Deserialize, Serialize};

    use super::{EventDescriptor, EventType, FilterRule, KeyFilter};
    use crate::error::{Error, Result};

    pub const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

    pub enum Kind {
        Queue,
        Topic,
        CloudFunction,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(rename = "NotificationConfiguration")]
    pub struct NotificationConfigurationXml {
        #[serde(rename = "@xmlns", default, skip_serializing_if = "Option::is_none")]
        pub xmlns: Option<String>,
        #[serde(rename = "QueueConfiguration", default)]
        pub queues: Vec<DestinationXml>,
        #[serde(rename = "TopicConfiguration", default)]
        pub topics: Vec<DestinationXml>,
        #[serde(rename = "CloudFunctionConfiguration", default)]
        pub cloud_functions: Vec<DestinationXml>,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct DestinationXml {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub queue: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub topic: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub cloud_function: Option<String>,
        #[serde(rename = "Event", default)]
        pub events: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub filter: Option<FilterXml>,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct FilterXml {
        #[serde(rename = "S3Key", default)]
        pub s3_key: S3KeyXml,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct S3KeyXml {
        #[serde(rename = "FilterRule", default)]
        pub rules: Vec<FilterRuleXml>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct FilterRuleXml {
        pub name: String,
        pub value: String,
    }

    impl DestinationXml {
        pub fn into_descriptor(
            mut self,
            destination: impl FnOnce(&mut Self) -> Option<String>,
            element: &str,
        ) -> Result<EventDescriptor> {
            let destination_id = destination(&mut self).ok_or_else(|| {
                Error::MalformedXML(format!("Missing {} element in configuration", element))
            })?;
            let events = self
                .events
                .iter()
                .map(|e| e.trim().parse::<EventType>())
                .collect::<Result<Vec<_>>>()?;
            let rules = self
                .filter
                .map(|f| {
                    f.s3_key
                        .rules
                        .into_iter()
                        .map(|r| FilterRule {
                            name: r.name,
                            value: r.value,
                        })
                        .collect()
                })
                .unwrap_or_default();

            Ok(EventDescriptor {
                id: self
                    .id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                destination_id,
                events,
                filter: KeyFilter { rules },
            })
        }

        pub fn from_descriptor(descriptor: &EventDescriptor, kind: Kind) -> Self {
            let arn = Some(descriptor.destination_id.clone());
            let (queue, topic, cloud_function) = match kind {
                Kind::Queue => (arn, None, None),
                Kind::Topic => (None, arn, None),
                Kind::CloudFunction => (None, None, arn),
            };
            let filter = (!descriptor.filter.is_empty()).then(|| FilterXml {
                s3_key: S3KeyXml {
                    rules: descriptor
                        .filter
                        .rules
                        .iter()
                        .map(|r| FilterRuleXml {
                            name: r.name.clone(),
                            value: r.value.clone(),
                        })
                        .collect(),
                },
            });

            Self {
                id: Some(descriptor.id.clone()),
                queue,
                topic,
                cloud_function,
                events: descriptor.events.iter().map(|e| e.to_string()).collect(),
                filter,
            }
        }
    }
}
