//! MQTT session.
//!
//! Owns the broker connection and feeds every publish, in delivery order,
//! to the message router. Subscriptions are renewed on every `ConnAck` so a
//! reconnect picks them up again.

use std::future::Future;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, SubscribeReasonCode, Transport};
use tracing::{debug, error, info, warn};

use zigspool_core::{BridgeConfig, MqttSettings};
use zigspool_devices::{DeviceRegistry, MessageRouter};

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

/// Build client options from the configured settings.
pub fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let endpoint = &settings.endpoint;
    let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
    options.set_keep_alive(KEEP_ALIVE);
    // Large networks publish a roster of several hundred kilobytes.
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    if let Some(user) = &settings.username {
        options.set_credentials(user, settings.password.clone().unwrap_or_default());
    }

    if endpoint.tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    options
}

async fn subscribe(client: &AsyncClient, config: &BridgeConfig) {
    for topic in [config.wildcard_topic(), config.bridge_state_topic()] {
        info!("Subscribing to MQTT topic {} ...", topic);
        if let Err(e) = client.subscribe(&topic, QoS::AtMostOnce).await {
            error!("Error subscribing to topic {}: {}", topic, e);
        }
    }
}

/// Run the session until `shutdown` resolves.
pub async fn run<S>(
    config: &BridgeConfig,
    registry: &mut DeviceRegistry,
    router: &MessageRouter,
    shutdown: S,
) -> anyhow::Result<()>
where
    S: Future,
{
    let (client, mut eventloop) = AsyncClient::new(mqtt_options(&config.mqtt), 10);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                if let Err(e) = client.disconnect().await {
                    debug!("Disconnect request failed: {}", e);
                }
                break;
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT server {}", config.mqtt.endpoint.full_broker_addr());
                        subscribe(&client, config).await;
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        if ack
                            .return_codes
                            .iter()
                            .any(|code| matches!(code, SubscribeReasonCode::Failure))
                        {
                            error!("Broker rejected subscription (packet {})", ack.pkid);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        router.dispatch(registry, &publish.topic, &publish.payload);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        info!("Disconnected from MQTT server");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT Error {}, client going offline", e);
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
    }

    Ok(())
}
