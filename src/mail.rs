//! Send emails to users for booking updates.

use std::borrow::Cow;
use std::sync::Arc;

use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{
    AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo,
};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use url::Url;

use crate::config::Mail;
use crate::error::{Result, ServerError};

const DEFAULT_AMPQ_HOST: &str = "localhost";
const DEFAULT_AMPQ_PORT: u16 = 5672;
const DEFAULT_AMPQ_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;

/// Mailer templates list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Ask a new user to activate the account.
    AccountActivation,
    /// Send a password reset link.
    PasswordReset,
    /// Confirm a new reservation.
    ReservationCreated,
    /// Alert attendees of a reservation change.
    ReservationUpdated,
    /// Alert attendees of a cancellation.
    ReservationCancelled,
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    locale: Option<Cow<'a, str>>,
    to: Cow<'a, str>,
    template: Template,
    /// Template parameters, rendered by the mailer service.
    variables: serde_json::Value,
}

/// Mailer queue manager.
#[derive(Debug, Clone, Default)]
pub struct MailManager {
    queue: String,
    conn: Option<Arc<Connection>>,
}

impl MailManager {
    /// Create a new [`MailManager`].
    pub async fn new(config: &Mail) -> Result<Self> {
        let addr = Url::parse(&config.address)?;
        let scheme = match addr.scheme() {
            "amqp" => AMQPScheme::AMQP,
            "amqps" => AMQPScheme::AMQPS,
            _ => return Err(ServerError::InvalidScheme),
        };
        let uri = AMQPUri {
            scheme,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMPQ_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMPQ_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or(DEFAULT_AMPQ_VHOST.to_string()),
            query: AMQPQueryString {
                channel_max: config.pool,
                ..Default::default()
            },
        };

        let conn_config = ConnectionProperties::default()
            .with_connection_name("reserva_mailer_client".into());
        let conn = Connection::connect_uri(uri, conn_config).await?;

        tracing::info!(%addr, "rabbitmq connected");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Some(Arc::new(conn)),
        })
    }

    async fn create_channel(
        conn: Arc<Connection>,
        queue: &str,
    ) -> Result<Channel> {
        let channel = conn.create_channel().await?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(channel)
    }

    fn create_event(data: Content) -> Cloudevent {
        let id = Alphanumeric.sample_string(&mut OsRng, ID_LENGTH);
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: "com.reserva.email",
            source: "com.reserva.auth",
            id,
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }

    /// Publish an event for a specific recipient.
    ///
    /// Dispatch is best-effort: failures are logged, never propagated.
    pub async fn publish_event(
        &self,
        template: Template,
        to: &str,
        locale: Option<&str>,
        variables: serde_json::Value,
    ) {
        if let Err(err) =
            self.publish(template.clone(), to, locale, variables).await
        {
            tracing::error!(?template, error = %err, "failed to send event");
        }
    }

    async fn publish(
        &self,
        template: Template,
        to: &str,
        locale: Option<&str>,
        variables: serde_json::Value,
    ) -> Result<()> {
        let Some(conn) = &self.conn else {
            tracing::debug!(?template, "mailer is not configured");
            return Ok(());
        };
        let channel =
            Self::create_channel(Arc::clone(conn), &self.queue).await?;

        let content = Content {
            locale: locale.map(Cow::from),
            to: Cow::from(to),
            template,
            variables,
        };
        let payload = Self::create_event(content);
        let payload = serde_json::to_string(&payload)?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await?;

        tracing::trace!(queue = %self.queue, "event sent");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope() {
        let event = MailManager::create_event(Content {
            locale: Some(Cow::from("fr")),
            to: Cow::from("alice@example.org"),
            template: Template::ReservationCreated,
            variables: serde_json::json!({ "room": "B-204" }),
        });

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap())
                .unwrap();

        assert_eq!(value["specversion"], "1.0");
        assert_eq!(value["type"], "com.reserva.email");
        assert_eq!(value["datacontenttype"], "application/json");
        assert_eq!(value["id"].as_str().unwrap().len(), ID_LENGTH);
        assert_eq!(value["data"]["template"], "reservation_created");
        assert_eq!(value["data"]["to"], "alice@example.org");
        assert_eq!(value["data"]["variables"]["room"], "B-204");
    }

    #[tokio::test]
    async fn test_unconfigured_manager_swallows_events() {
        let mail = MailManager::default();
        mail.publish_event(
            Template::AccountActivation,
            "alice@example.org",
            None,
            serde_json::Value::Null,
        )
        .await;
    }
}
