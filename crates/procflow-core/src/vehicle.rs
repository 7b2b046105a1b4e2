//! Vehicles: transport requests are batched into trips that carry entities to
//! their bound destinations.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::component::{ComponentKind, HasQueueStats, HasTransportStats};
use crate::distribution::Distribution;
use crate::fixed::{SimTime, time_to_f64, to_time};
use crate::id::{ComponentId, EntityId, TripId};
use crate::kernel::{Action, Holder};
use crate::model::Model;

/// Group vehicles join when none is configured.
pub const DEFAULT_VEHICLE_GROUP: &str = "Default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    /// Passengers per trip.
    pub vehicle_capacity: usize,
    /// Only leave with a full load.
    pub batching: bool,
    /// Trips that may be under way at once.
    pub trip_capacity: usize,
    pub travel_time: Distribution,
    pub group: Option<String>,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            vehicle_capacity: 1,
            batching: false,
            trip_capacity: 1,
            travel_time: Distribution::default(),
            group: None,
        }
    }
}

impl VehicleConfig {
    pub fn new(travel_time: Distribution) -> Self {
        Self {
            travel_time,
            ..Self::default()
        }
    }

    pub fn capacity(mut self, n: usize) -> Self {
        self.vehicle_capacity = n;
        self
    }

    pub fn batching(mut self) -> Self {
        self.batching = true;
        self
    }

    pub fn trips(mut self, n: usize) -> Self {
        self.trip_capacity = n;
        self
    }

    pub fn group(mut self, name: impl Into<String>) -> Self {
        self.group = Some(name.into());
        self
    }
}

/// An entity waiting for a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportRequest {
    pub entity: EntityId,
    pub destination: ComponentId,
    pub requested_at: SimTime,
    /// Stays blocked until pickup.
    pub origin: Holder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    pub passengers: Vec<(EntityId, ComponentId)>,
    pub started: SimTime,
    pub travel_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportStats {
    pub entities_transported: u64,
    pub total_trips: u64,
    pub total_travel_time: f64,
    pub utilized_time: f64,
    /// `(start, end, passengers)` per finished trip.
    pub trips_over_time: Vec<(f64, f64, usize)>,
    pub queue_length: usize,
    pub queue_lengths: Vec<(f64, usize)>,
    pub queue_times: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Vehicle {
    pub vehicle_capacity: usize,
    pub batching: bool,
    pub trip_capacity: usize,
    pub travel_time: Distribution,
    requests: VecDeque<TransportRequest>,
    trips: BTreeMap<TripId, Trip>,
    next_trip: u64,
    pub stats: TransportStats,
}

impl Vehicle {
    pub fn new(config: &VehicleConfig) -> Self {
        Self {
            vehicle_capacity: config.vehicle_capacity.max(1),
            batching: config.batching,
            trip_capacity: config.trip_capacity.max(1),
            travel_time: config.travel_time.clone(),
            requests: VecDeque::new(),
            trips: BTreeMap::new(),
            next_trip: 0,
            stats: TransportStats::default(),
        }
    }

    pub fn waiting(&self) -> usize {
        self.requests.len()
    }

    pub fn active_trips(&self) -> usize {
        self.trips.len()
    }

    pub fn request(&mut self, request: TransportRequest, record: bool) {
        let now = request.requested_at;
        self.requests.push_back(request);
        self.stats.queue_length = self.requests.len();
        if record {
            self.stats
                .queue_lengths
                .push((time_to_f64(now), self.stats.queue_length));
        }
    }

    /// Load the next trip, if a trip may start now.
    pub fn next_load(&mut self, now: SimTime, record: bool) -> Option<Vec<TransportRequest>> {
        if self.trips.len() >= self.trip_capacity || self.requests.is_empty() {
            return None;
        }
        if self.batching && self.requests.len() < self.vehicle_capacity {
            return None;
        }
        let n = self.requests.len().min(self.vehicle_capacity);
        let load: Vec<TransportRequest> = self.requests.drain(..n).collect();
        self.stats.queue_length = self.requests.len();
        if record {
            let t = time_to_f64(now);
            self.stats
                .queue_times
                .extend(load.iter().map(|r| t - time_to_f64(r.requested_at)));
            self.stats.queue_lengths.push((t, self.stats.queue_length));
        }
        Some(load)
    }

    pub fn start_trip(&mut self, load: &[TransportRequest], now: SimTime, travel_time: f64) -> TripId {
        let id = TripId(self.next_trip);
        self.next_trip += 1;
        self.trips.insert(
            id,
            Trip {
                passengers: load.iter().map(|r| (r.entity, r.destination)).collect(),
                started: now,
                travel_time,
            },
        );
        id
    }

    pub fn finish_trip(&mut self, trip: TripId, now: SimTime, record: bool) -> Option<Trip> {
        let trip = self.trips.remove(&trip)?;
        if record {
            self.stats.total_trips += 1;
            self.stats.entities_transported += trip.passengers.len() as u64;
            self.stats.total_travel_time += trip.travel_time;
            self.stats.utilized_time += trip.travel_time;
            self.stats.trips_over_time.push((
                time_to_f64(trip.started),
                time_to_f64(now),
                trip.passengers.len(),
            ));
        }
        Some(trip)
    }

    pub fn reset_stats(&mut self) {
        let queue_length = self.stats.queue_length;
        self.stats = TransportStats {
            queue_length,
            ..TransportStats::default()
        };
    }
}

impl HasTransportStats for Vehicle {
    fn entities_transported(&self) -> u64 {
        self.stats.entities_transported
    }

    fn total_trips(&self) -> u64 {
        self.stats.total_trips
    }

    fn total_travel_time(&self) -> f64 {
        self.stats.total_travel_time
    }

    fn utilized_time(&self) -> f64 {
        self.stats.utilized_time
    }

    fn trips_over_time(&self) -> &[(f64, f64, usize)] {
        &self.stats.trips_over_time
    }
}

impl HasQueueStats for Vehicle {
    fn queue_length(&self) -> usize {
        self.stats.queue_length
    }

    fn queue_lengths(&self) -> &[(f64, usize)] {
        &self.stats.queue_lengths
    }

    fn queue_times(&self) -> &[f64] {
        &self.stats.queue_times
    }
}

impl Model {
    /// Hand an entity to the least loaded vehicle of `group`. The origin
    /// stays blocked until pickup, which may happen before this returns.
    /// Returns `true` only if the entity was delivered directly.
    pub(crate) fn request_transport(
        &mut self,
        group: &str,
        entity: EntityId,
        destination: ComponentId,
        origin: Holder,
    ) -> bool {
        let vehicle = self.vehicle_groups.get(group).and_then(|members| {
            members
                .iter()
                .copied()
                .min_by_key(|&v| match &self.components[v].kind {
                    ComponentKind::Vehicle(v) => v.waiting(),
                    _ => usize::MAX,
                })
        });
        let Some(vehicle) = vehicle else {
            warn!(group, "no vehicle in group, delivering directly");
            self.record_exit(origin.component);
            self.deliver(entity, destination);
            return true;
        };

        let now = self.scheduler.now();
        let record = self.recording();
        if let ComponentKind::Vehicle(v) = &mut self.components[vehicle].kind {
            v.request(
                TransportRequest {
                    entity,
                    destination,
                    requested_at: now,
                    origin,
                },
                record,
            );
        }
        debug!(vehicle = %self.components[vehicle].name, "transport requested");
        self.dispatch_trips(vehicle);
        false
    }

    /// Start every trip that may start now and release the origins of the
    /// picked up entities.
    pub(crate) fn dispatch_trips(&mut self, id: ComponentId) {
        let now = self.scheduler.now();
        let record = self.recording();
        loop {
            let ComponentKind::Vehicle(vehicle) = &mut self.components[id].kind else {
                return;
            };
            let Some(load) = vehicle.next_load(now, record) else {
                return;
            };
            let travel = vehicle.travel_time.sample(&mut self.rng);
            let trip = vehicle.start_trip(&load, now, travel);
            trace!(vehicle = %self.components[id].name, passengers = load.len(), travel, "trip started");
            self.scheduler
                .schedule_in(to_time(travel), Action::TripDone { vehicle: id, trip });

            for request in load {
                self.record_exit(request.origin.component);
                self.release_holder(request.origin);
            }
        }
    }

    pub(crate) fn trip_done(&mut self, id: ComponentId, trip: TripId) {
        let now = self.scheduler.now();
        let record = self.recording();
        let ComponentKind::Vehicle(vehicle) = &mut self.components[id].kind else {
            return;
        };
        let Some(trip) = vehicle.finish_trip(trip, now, record) else {
            return;
        };
        for (entity, destination) in trip.passengers {
            if self.entities.get(entity).is_some() {
                self.deliver(entity, destination);
            }
        }
        self.dispatch_trips(id);
    }
}
