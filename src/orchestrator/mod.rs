//! The fulfillment saga.
//!
//! Reacts to order lifecycle events and courier actions, driving deliveries
//! through their state machine and keeping the courier registry consistent.
//! Every handler runs as its own task and must stay safe under at-least-once
//! redelivery; idempotency comes from the conditional updates in the store
//! and registry, not from an external dedup table.
//!
//! Assignment protocol: the courier reservation is the authoritative lock.
//! Reserve first, then mark the delivery assigned, and roll the reservation
//! back if the delivery-side update fails, so no courier is left busy with
//! no delivery attached.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::OrderPhase;
use crate::engine::select_courier;
use crate::error::AppError;
use crate::gateway::{Envelope, run_consumer};
use crate::geo::estimated_delivery_time;
use crate::models::courier::{Courier, GeoPoint};
use crate::models::delivery::{Delivery, DeliveryStatus, NewDelivery};
use crate::models::event::{
    DeliveryEvent, OrderCancelled, OrderConfirmed, OrderReady, UserRegistered, keys,
};
use crate::state::AppState;

/// Wire up one consumer task per upstream routing key.
pub fn spawn_consumers(state: Arc<AppState>) {
    spawn_consumer(state.clone(), keys::ORDER_CONFIRMED, |state, envelope| async move {
        let event: OrderConfirmed = decode(envelope)?;
        handle_order_confirmed(state, event).await
    });
    spawn_consumer(state.clone(), keys::ORDER_CANCELLED, |state, envelope| async move {
        let event: OrderCancelled = decode(envelope)?;
        handle_order_cancelled(state, event.order_id).await
    });
    spawn_consumer(state.clone(), keys::ORDER_READY, |state, envelope| async move {
        let event: OrderReady = decode(envelope)?;
        handle_order_ready(state, event.order_id).await
    });
    spawn_consumer(state, keys::USER_REGISTERED, |state, envelope| async move {
        let event: UserRegistered = decode(envelope)?;
        handle_user_registered(state, event)
    });
}

fn spawn_consumer<H, Fut>(state: Arc<AppState>, routing_key: &'static str, handler: H)
where
    H: Fn(Arc<AppState>, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    let rx = state.gateway.subscribe(routing_key);
    let gateway = state.gateway.clone();
    tokio::spawn(async move {
        run_consumer(gateway, routing_key, rx, move |envelope| {
            handler(state.clone(), envelope)
        })
        .await;
    });
}

/// Typed validation at the gateway boundary. A payload that does not decode
/// is a poison message; the gateway dead-letters it without retry.
fn decode<T: serde::de::DeserializeOwned>(envelope: Envelope) -> Result<T, AppError> {
    serde_json::from_value(envelope.payload).map_err(|err| {
        AppError::Validation(format!(
            "malformed {} payload: {err}",
            envelope.routing_key
        ))
    })
}

// ---------------------------------------------------------------------------
// Event handlers
// ---------------------------------------------------------------------------

/// Create the delivery (idempotent) and attempt auto-assignment. A failed
/// assignment leaves the delivery pending and is only logged; a later manual
/// or re-triggered attempt may succeed. Collaborator failures before the
/// record exists propagate, so the message is redelivered.
pub async fn handle_order_confirmed(
    state: Arc<AppState>,
    event: OrderConfirmed,
) -> Result<(), AppError> {
    let restaurant = state.catalog.fetch_restaurant(event.restaurant_id).await?;

    let (delivery, created) = create_delivery(
        &state,
        NewDelivery {
            order_id: event.order_id,
            order_number: event.order_number,
            restaurant_id: event.restaurant_id,
            restaurant_name: restaurant.name,
            pickup: restaurant.location,
            dropoff: event.delivery_address,
            customer_name: event.customer.name,
            customer_phone: event.customer.phone,
            items_summary: event.items_summary,
        },
    )
    .await;

    if !created && delivery.status != DeliveryStatus::PendingAssignment {
        debug!(delivery_id = %delivery.id, "redelivered order.confirmed for settled delivery");
        return Ok(());
    }

    match auto_assign(state.clone(), delivery.id).await {
        Ok(assigned) => {
            info!(
                delivery_id = %assigned.id,
                order_id = %assigned.order_id,
                courier_id = ?assigned.courier_id,
                "delivery auto-assigned"
            );
        }
        Err(AppError::NoCourierAvailable) => {
            info!(
                delivery_id = %delivery.id,
                order_id = %delivery.order_id,
                "no courier available; delivery left pending"
            );
        }
        Err(err) => {
            warn!(
                delivery_id = %delivery.id,
                error = %err,
                "auto-assignment failed; delivery left pending"
            );
        }
    }

    Ok(())
}

/// Cancel the matching delivery. Missing or already-terminal records are a
/// no-op; concurrent writers are retried until the record settles.
pub async fn handle_order_cancelled(state: Arc<AppState>, order_id: Uuid) -> Result<(), AppError> {
    let Some(delivery) = state.deliveries.get_by_order(order_id) else {
        debug!(%order_id, "order.cancelled for unknown delivery; nothing to do");
        return Ok(());
    };

    loop {
        let Some(current) = state.deliveries.get(delivery.id) else {
            return Ok(());
        };
        if current.status.is_terminal() {
            return Ok(());
        }

        match state.deliveries.transition(
            current.id,
            DeliveryStatus::Cancelled,
            current.status,
            None,
            Some("order cancelled".to_string()),
        ) {
            Ok(cancelled) => {
                state.metrics.active_deliveries.dec();
                if let Some(courier_id) = cancelled.courier_id {
                    state.registry.release(courier_id);
                }
                state
                    .gateway
                    .publish_event(&DeliveryEvent::Cancelled {
                        delivery_id: cancelled.id,
                        order_id: cancelled.order_id,
                        courier_id: cancelled.courier_id,
                        cancelled_at: Utc::now(),
                    })
                    .await?;
                info!(delivery_id = %cancelled.id, %order_id, "delivery cancelled");
                return Ok(());
            }
            // Lost a race against another writer; re-read and try again.
            Err(AppError::StaleState(_)) => continue,
            Err(err) => return Err(err),
        }
    }
}

/// The order hit the counter: move the delivery to picked up. The event is
/// itself the readiness proof, so no synchronous check happens here. Unknown
/// deliveries are logged and dropped; a not-yet-assigned delivery nacks so
/// redelivery can catch a late assignment.
pub async fn handle_order_ready(state: Arc<AppState>, order_id: Uuid) -> Result<(), AppError> {
    let Some(delivery) = state.deliveries.get_by_order(order_id) else {
        warn!(%order_id, "order.ready for unknown delivery; dropping");
        return Ok(());
    };

    match delivery.status {
        DeliveryStatus::PickedUp | DeliveryStatus::InTransit | DeliveryStatus::Delivered => {
            // Redelivered after the courier already moved on.
            return Ok(());
        }
        DeliveryStatus::Failed | DeliveryStatus::Cancelled => return Ok(()),
        DeliveryStatus::PendingAssignment => {
            return Err(AppError::StaleState(format!(
                "delivery {} not yet assigned on order.ready",
                delivery.id
            )));
        }
        DeliveryStatus::Assigned => {}
    }

    let picked_up = state.deliveries.transition(
        delivery.id,
        DeliveryStatus::PickedUp,
        DeliveryStatus::Assigned,
        None,
        Some("order ready; picked up".to_string()),
    )?;

    state
        .gateway
        .publish_event(&DeliveryEvent::PickedUp {
            delivery_id: picked_up.id,
            order_id: picked_up.order_id,
            courier_id: picked_up.courier_id,
            picked_up_at: Utc::now(),
        })
        .await?;

    info!(delivery_id = %picked_up.id, %order_id, "delivery picked up");
    Ok(())
}

/// Lazily create a courier record for a freshly registered courier account.
pub fn handle_user_registered(state: Arc<AppState>, event: UserRegistered) -> Result<(), AppError> {
    if !event.role.eq_ignore_ascii_case("courier") {
        return Ok(());
    }

    let courier = state
        .registry
        .ensure_registered(event.user_id, event.name, event.phone);
    info!(courier_id = %courier.id, user_id = %event.user_id, "courier record ready");
    Ok(())
}

// ---------------------------------------------------------------------------
// Delivery creation
// ---------------------------------------------------------------------------

/// Shared by the event path and the explicit create-for-order request.
pub async fn create_delivery(state: &AppState, facts: NewDelivery) -> (Delivery, bool) {
    let (delivery, created) = state.deliveries.create(facts);

    if created {
        state.metrics.deliveries_created_total.inc();
        state.metrics.active_deliveries.inc();
        if let Err(err) = state
            .gateway
            .publish_event(&DeliveryEvent::Created {
                delivery_id: delivery.id,
                order_id: delivery.order_id,
                order_number: delivery.order_number.clone(),
                restaurant_id: delivery.restaurant_id,
                restaurant_name: delivery.restaurant_name.clone(),
                status: delivery.status,
                created_at: delivery.created_at,
            })
            .await
        {
            warn!(delivery_id = %delivery.id, error = %err, "failed to publish delivery.created");
        }
        info!(
            delivery_id = %delivery.id,
            order_id = %delivery.order_id,
            "delivery created"
        );
    }

    (delivery, created)
}

/// Build a delivery for an order by id, pulling the facts from the order and
/// restaurant collaborators.
pub async fn create_delivery_for_order(
    state: Arc<AppState>,
    order_id: Uuid,
) -> Result<(Delivery, bool), AppError> {
    if let Some(existing) = state.deliveries.get_by_order(order_id) {
        return Ok((existing, false));
    }

    let order = state.catalog.fetch_order(order_id).await?;
    let restaurant = state.catalog.fetch_restaurant(order.restaurant_id).await?;

    let delivery = create_delivery(
        &state,
        NewDelivery {
            order_id,
            order_number: order.order_number,
            restaurant_id: order.restaurant_id,
            restaurant_name: restaurant.name,
            pickup: restaurant.location,
            dropoff: order.delivery_address,
            customer_name: order.customer_name,
            customer_phone: order.customer_phone,
            items_summary: order.items_summary,
        },
    )
    .await;

    Ok(delivery)
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// Let the matching engine pick a courier and bind them to the delivery.
pub async fn auto_assign(state: Arc<AppState>, delivery_id: Uuid) -> Result<Delivery, AppError> {
    let started = Instant::now();
    let result = try_auto_assign(&state, delivery_id).await;
    observe_assignment(&state, started, &result);
    result
}

async fn try_auto_assign(state: &Arc<AppState>, delivery_id: Uuid) -> Result<Delivery, AppError> {
    let delivery = state
        .deliveries
        .get(delivery_id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    if delivery.status != DeliveryStatus::PendingAssignment {
        return Err(AppError::AlreadyAssigned(format!(
            "delivery {delivery_id} is {}",
            delivery.status
        )));
    }

    let courier = select_courier(&state.registry, &delivery.pickup.point, &state.matching)?;
    bind_courier(state, &delivery, &courier).await
}

/// Bind a specific courier, manual path. Rejects with a conflict when either
/// side is already taken.
pub async fn assign_specific(
    state: Arc<AppState>,
    delivery_id: Uuid,
    courier_id: Uuid,
) -> Result<Delivery, AppError> {
    let started = Instant::now();
    let result = try_assign_specific(&state, delivery_id, courier_id).await;
    observe_assignment(&state, started, &result);
    result
}

async fn try_assign_specific(
    state: &Arc<AppState>,
    delivery_id: Uuid,
    courier_id: Uuid,
) -> Result<Delivery, AppError> {
    let delivery = state
        .deliveries
        .get(delivery_id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    if delivery.status != DeliveryStatus::PendingAssignment {
        return Err(AppError::AlreadyAssigned(format!(
            "delivery {delivery_id} is {}",
            delivery.status
        )));
    }

    let courier = state
        .registry
        .get(courier_id)
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

    if !courier.active || !courier.verified || !courier.profile_complete {
        return Err(AppError::Conflict(format!(
            "courier {courier_id} is not eligible for assignment"
        )));
    }

    bind_courier(state, &delivery, &courier).await
}

/// Reserve-then-assign with rollback. The reservation is the lock; if the
/// delivery-side update loses, the courier goes straight back to the pool.
async fn bind_courier(
    state: &Arc<AppState>,
    delivery: &Delivery,
    courier: &Courier,
) -> Result<Delivery, AppError> {
    let reserved = state.registry.reserve(courier.id, delivery.id)?;

    let eta = estimated_delivery_time(
        Utc::now(),
        &delivery.pickup.point,
        &delivery.dropoff.point,
        &state.matching,
    );

    let assigned =
        match state
            .deliveries
            .assign_courier(delivery.id, reserved.id, &reserved.name, eta)
        {
            Ok(assigned) => assigned,
            Err(err) => {
                state.registry.release(reserved.id);
                return Err(err);
            }
        };

    state
        .gateway
        .publish_event(&DeliveryEvent::Assigned {
            delivery_id: assigned.id,
            order_id: assigned.order_id,
            courier_id: reserved.id,
            courier_name: reserved.name.clone(),
            estimated_delivery_at: assigned.estimated_delivery_at,
            assigned_at: Utc::now(),
        })
        .await?;

    info!(
        delivery_id = %assigned.id,
        order_id = %assigned.order_id,
        courier_id = %reserved.id,
        "courier assigned"
    );
    Ok(assigned)
}

fn observe_assignment(state: &AppState, started: Instant, result: &Result<Delivery, AppError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(AppError::NoCourierAvailable) => "no_courier",
        Err(_) => "error",
    };
    state
        .metrics
        .assignment_latency_seconds
        .with_label_values(&[outcome])
        .observe(started.elapsed().as_secs_f64());
    state
        .metrics
        .assignments_total
        .with_label_values(&[outcome])
        .inc();
}

// ---------------------------------------------------------------------------
// Courier actions
// ---------------------------------------------------------------------------

/// Courier-scoped status update. The caller must own the delivery; a pickup
/// is additionally gated on the order actually being ready, checked
/// synchronously against the order collaborator.
pub async fn update_status(
    state: Arc<AppState>,
    delivery_id: Uuid,
    courier_id: Uuid,
    new_status: DeliveryStatus,
    location: Option<GeoPoint>,
) -> Result<Delivery, AppError> {
    let delivery = state
        .deliveries
        .get(delivery_id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    let Some(owner) = delivery.courier_id else {
        return Err(AppError::Forbidden(format!(
            "delivery {delivery_id} has no assigned courier"
        )));
    };
    if owner != courier_id {
        return Err(AppError::Forbidden(format!(
            "delivery {delivery_id} is not assigned to courier {courier_id}"
        )));
    }

    if !matches!(
        new_status,
        DeliveryStatus::PickedUp
            | DeliveryStatus::InTransit
            | DeliveryStatus::Delivered
            | DeliveryStatus::Failed
    ) {
        return Err(AppError::InvalidTransition {
            from: delivery.status,
            to: new_status,
        });
    }

    if new_status == DeliveryStatus::PickedUp {
        let phase = state.catalog.fetch_order_status(delivery.order_id).await?;
        if phase != OrderPhase::Ready {
            return Err(AppError::NotReady(delivery.order_id));
        }
    }

    let updated = state.deliveries.transition(
        delivery_id,
        new_status,
        delivery.status,
        location,
        None,
    )?;

    if matches!(new_status, DeliveryStatus::Delivered | DeliveryStatus::Failed) {
        state.metrics.active_deliveries.dec();
        state.registry.release(courier_id);
    }

    let event = match new_status {
        DeliveryStatus::PickedUp => DeliveryEvent::PickedUp {
            delivery_id: updated.id,
            order_id: updated.order_id,
            courier_id: updated.courier_id,
            picked_up_at: Utc::now(),
        },
        _ => DeliveryEvent::StatusUpdated {
            delivery_id: updated.id,
            order_id: updated.order_id,
            status: updated.status,
            courier_id: updated.courier_id,
            updated_at: Utc::now(),
        },
    };
    state.gateway.publish_event(&event).await?;

    info!(
        delivery_id = %updated.id,
        courier_id = %courier_id,
        status = %updated.status,
        "delivery status updated"
    );
    Ok(updated)
}

/// Courier location ping. The ping itself never fails on downstream posting;
/// a failure to cross-post the tracking entry is logged and swallowed.
pub fn location_ping(
    state: &AppState,
    courier_id: Uuid,
    point: GeoPoint,
) -> Result<Courier, AppError> {
    if !point.is_valid() {
        return Err(AppError::Validation(format!(
            "invalid coordinates ({}, {})",
            point.lat, point.lng
        )));
    }

    let (courier, active_delivery) = state
        .registry
        .update_location(courier_id, point, Utc::now())?;

    if let Some(delivery_id) = active_delivery {
        if let Err(err) = state.deliveries.append_tracking(
            delivery_id,
            point,
            Some("courier location update".to_string()),
        ) {
            warn!(
                %delivery_id,
                courier_id = %courier.id,
                error = %err,
                "failed to cross-post tracking entry"
            );
        }
    }

    Ok(courier)
}
