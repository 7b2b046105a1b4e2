//! Weekly work schedules: a pure function from simulation time to
//! `(active?, capacity, time until the next change)`.
//!
//! Shifts are given per weekday in wall-clock hours and minutes and converted
//! to model steps with a [`TimeUnit`]. A week is `7 * steps_per_day` steps; a
//! query at time `t` looks at `(t + start_offset) mod week`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::fixed::{SimTime, f64_to_fixed64};

pub const DAYS_PER_WEEK: usize = 7;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    #[error("start hour {0} out of range 0-23")]
    StartHour(u32),
    #[error("end hour {0} out of range 0-24")]
    EndHour(u32),
    #[error("minute {0} out of range 0-59")]
    Minute(u32),
    #[error("the day has only 24 hours (end 24:{0:02})")]
    PastMidnight(u32),
    #[error("shift ends at or before it starts ({start} >= {end} minutes)")]
    EmptyShift { start: u32, end: u32 },
    #[error("there are overlaps in the work schedule ({day_a} and {day_b})")]
    Overlap { day_a: Weekday, day_b: Weekday },
    #[error("unknown weekday '{0}'")]
    UnknownWeekday(String),
}

// ---------------------------------------------------------------------------
// Time units and weekdays
// ---------------------------------------------------------------------------

/// What one model step means in wall-clock time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Seconds,
    #[default]
    Minutes,
    Hours,
}

impl TimeUnit {
    pub fn steps_per_day(self) -> f64 {
        match self {
            TimeUnit::Seconds => 86_400.0,
            TimeUnit::Minutes => 1_440.0,
            TimeUnit::Hours => 24.0,
        }
    }

    pub fn steps_per_week(self) -> f64 {
        self.steps_per_day() * DAYS_PER_WEEK as f64
    }

    /// Convert a wall-clock span into model steps.
    pub fn to_steps(self, days: f64, hours: f64, minutes: f64) -> f64 {
        let per_day = self.steps_per_day();
        days * per_day + hours * per_day / 24.0 + minutes * per_day / 1_440.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weekday {
    #[default]
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; DAYS_PER_WEEK] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl FromStr for Weekday {
    type Err = ScheduleError;

    /// Accepts English day names (any case, full or three-letter) or an index
    /// where 0 is Monday.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(index) = trimmed.parse::<usize>() {
            return Self::from_index(index)
                .ok_or_else(|| ScheduleError::UnknownWeekday(s.to_string()));
        }
        let lower = trimmed.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|d| {
                let name = d.to_string().to_ascii_lowercase();
                name == lower || (lower.len() == 3 && name.starts_with(&lower))
            })
            .ok_or_else(|| ScheduleError::UnknownWeekday(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Day schedule
// ---------------------------------------------------------------------------

/// One shift within a day, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayShift {
    pub start_minute: u32,
    pub end_minute: u32,
    pub capacity: u32,
}

/// The shifts of a single weekday.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkScheduleDay {
    shifts: Vec<DayShift>,
}

impl WorkScheduleDay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a shift `start_hour:start_minute` to `end_hour:end_minute` with
    /// the given capacity. `24:00` is a valid end.
    pub fn set_time(
        &mut self,
        start_hour: u32,
        start_minute: u32,
        end_hour: u32,
        end_minute: u32,
        capacity: u32,
    ) -> Result<&mut Self, ScheduleError> {
        if start_hour > 23 {
            return Err(ScheduleError::StartHour(start_hour));
        }
        if end_hour > 24 {
            return Err(ScheduleError::EndHour(end_hour));
        }
        for minute in [start_minute, end_minute] {
            if minute > 59 {
                return Err(ScheduleError::Minute(minute));
            }
        }
        if end_hour == 24 && end_minute != 0 {
            return Err(ScheduleError::PastMidnight(end_minute));
        }
        let start = start_hour * 60 + start_minute;
        let end = end_hour * 60 + end_minute;
        if end <= start {
            return Err(ScheduleError::EmptyShift { start, end });
        }
        self.shifts.push(DayShift {
            start_minute: start,
            end_minute: end,
            capacity,
        });
        Ok(self)
    }

    /// Builder-style variant of [`set_time`](Self::set_time).
    pub fn with_shift(
        mut self,
        start_hour: u32,
        start_minute: u32,
        end_hour: u32,
        end_minute: u32,
        capacity: u32,
    ) -> Result<Self, ScheduleError> {
        self.set_time(start_hour, start_minute, end_hour, end_minute, capacity)?;
        Ok(self)
    }

    pub fn shifts(&self) -> &[DayShift] {
        &self.shifts
    }

    pub fn clear(&mut self) {
        self.shifts.clear();
    }
}

// ---------------------------------------------------------------------------
// Week schedule
// ---------------------------------------------------------------------------

/// A shift placed in the week, in model steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub day: Weekday,
    pub start: SimTime,
    pub end: SimTime,
    pub capacity: u32,
}

/// The answer to "is the schedule on right now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    /// Inside a shift; `remaining` steps until it ends.
    Active { capacity: u32, remaining: SimTime },
    /// Outside every shift; `wait` steps until the next one starts.
    Inactive { wait: SimTime },
}

impl ScheduleState {
    pub fn is_active(&self) -> bool {
        matches!(self, ScheduleState::Active { .. })
    }

    /// Steps until the state flips.
    pub fn next_change(&self) -> SimTime {
        match *self {
            ScheduleState::Active { remaining, .. } => remaining,
            ScheduleState::Inactive { wait } => wait,
        }
    }

    pub fn capacity(&self) -> u32 {
        match *self {
            ScheduleState::Active { capacity, .. } => capacity,
            ScheduleState::Inactive { .. } => 0,
        }
    }
}

/// A validated weekly schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkScheduleWeek {
    shifts: Vec<Shift>,
    week: SimTime,
    start_offset: SimTime,
    time_unit: TimeUnit,
}

impl WorkScheduleWeek {
    /// Combine seven day schedules (Monday first). Fails if any two shifts
    /// overlap.
    pub fn new(
        days: [WorkScheduleDay; DAYS_PER_WEEK],
        time_unit: TimeUnit,
        start_offset: SimTime,
    ) -> Result<Self, ScheduleError> {
        let per_minute = time_unit.steps_per_day() / 1_440.0;
        let per_day = time_unit.steps_per_day();
        let mut shifts: Vec<Shift> = Vec::new();
        for (i, day) in days.iter().enumerate() {
            let weekday = Weekday::ALL[i];
            let base = per_day * i as f64;
            for s in day.shifts() {
                shifts.push(Shift {
                    day: weekday,
                    start: f64_to_fixed64(base + s.start_minute as f64 * per_minute),
                    end: f64_to_fixed64(base + s.end_minute as f64 * per_minute),
                    capacity: s.capacity,
                });
            }
        }
        shifts.sort_by_key(|s| (s.start, s.end));
        for pair in shifts.windows(2) {
            if pair[0].end > pair[1].start {
                return Err(ScheduleError::Overlap {
                    day_a: pair[0].day,
                    day_b: pair[1].day,
                });
            }
        }
        Ok(Self {
            shifts,
            week: f64_to_fixed64(time_unit.steps_per_week()),
            start_offset,
            time_unit,
        })
    }

    /// The same day schedule on all seven days.
    pub fn every_day(
        day: WorkScheduleDay,
        time_unit: TimeUnit,
        start_offset: SimTime,
    ) -> Result<Self, ScheduleError> {
        Self::new(std::array::from_fn(|_| day.clone()), time_unit, start_offset)
    }

    /// Where in the week (in steps) absolute time `now` falls.
    pub fn step_in_week(&self, now: SimTime) -> SimTime {
        (now + self.start_offset) % self.week
    }

    /// Query the schedule at absolute time `now`.
    pub fn query(&self, now: SimTime) -> ScheduleState {
        let Some(first) = self.shifts.first() else {
            return ScheduleState::Inactive { wait: self.week };
        };
        let step = self.step_in_week(now);
        if let Some(shift) = self.shifts.iter().find(|s| s.start <= step && step < s.end) {
            return ScheduleState::Active {
                capacity: shift.capacity,
                remaining: shift.end - step,
            };
        }
        let wait = self
            .shifts
            .iter()
            .filter(|s| s.start >= step)
            .map(|s| s.start - step)
            .min()
            .unwrap_or(self.week - step + first.start);
        ScheduleState::Inactive { wait }
    }

    /// Capacity of the first shift of the week (default roster size).
    pub fn first_shift_capacity(&self) -> u32 {
        self.shifts.first().map_or(0, |s| s.capacity)
    }

    pub fn shifts(&self) -> &[Shift] {
        &self.shifts
    }

    pub fn week_length(&self) -> SimTime {
        self.week
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::to_time;

    fn nine_to_five() -> WorkScheduleDay {
        WorkScheduleDay::new().with_shift(9, 0, 17, 0, 3).unwrap()
    }

    #[test]
    fn set_time_validates_ranges() {
        let mut day = WorkScheduleDay::new();
        assert_eq!(day.set_time(24, 0, 24, 0, 1).unwrap_err(), ScheduleError::StartHour(24));
        assert_eq!(day.set_time(1, 0, 25, 0, 1).unwrap_err(), ScheduleError::EndHour(25));
        assert_eq!(day.set_time(1, 60, 2, 0, 1).unwrap_err(), ScheduleError::Minute(60));
        assert_eq!(day.set_time(1, 0, 24, 30, 1).unwrap_err(), ScheduleError::PastMidnight(30));
        assert!(matches!(
            day.set_time(10, 0, 9, 0, 1),
            Err(ScheduleError::EmptyShift { .. })
        ));
        assert!(day.set_time(22, 0, 24, 0, 1).is_ok());
    }

    #[test]
    fn overlapping_shifts_are_rejected() {
        let day = WorkScheduleDay::new()
            .with_shift(8, 0, 12, 0, 1)
            .unwrap()
            .with_shift(11, 0, 14, 0, 1)
            .unwrap();
        let err = WorkScheduleWeek::every_day(day, TimeUnit::Minutes, SimTime::ZERO).unwrap_err();
        assert!(matches!(err, ScheduleError::Overlap { .. }));
    }

    #[test]
    fn back_to_back_shifts_do_not_overlap() {
        let day = WorkScheduleDay::new()
            .with_shift(6, 0, 14, 0, 1)
            .unwrap()
            .with_shift(14, 0, 22, 0, 2)
            .unwrap();
        let week = WorkScheduleWeek::every_day(day, TimeUnit::Minutes, SimTime::ZERO).unwrap();
        assert_eq!(
            week.query(to_time(14.0 * 60.0)),
            ScheduleState::Active {
                capacity: 2,
                remaining: to_time(8.0 * 60.0)
            }
        );
    }

    #[test]
    fn active_inside_shift() {
        let week = WorkScheduleWeek::every_day(nine_to_five(), TimeUnit::Minutes, SimTime::ZERO).unwrap();
        let state = week.query(to_time(10.0 * 60.0));
        assert_eq!(
            state,
            ScheduleState::Active {
                capacity: 3,
                remaining: to_time(7.0 * 60.0)
            }
        );
    }

    #[test]
    fn inactive_before_shift_waits_until_start() {
        let week = WorkScheduleWeek::every_day(nine_to_five(), TimeUnit::Minutes, SimTime::ZERO).unwrap();
        assert_eq!(
            week.query(to_time(8.0 * 60.0)),
            ScheduleState::Inactive {
                wait: to_time(60.0)
            }
        );
    }

    #[test]
    fn end_of_shift_is_exclusive() {
        let week = WorkScheduleWeek::every_day(nine_to_five(), TimeUnit::Minutes, SimTime::ZERO).unwrap();
        let state = week.query(to_time(17.0 * 60.0));
        assert_eq!(
            state,
            ScheduleState::Inactive {
                wait: to_time(16.0 * 60.0)
            }
        );
    }

    #[test]
    fn wraps_to_next_week() {
        let monday_only = [
            nine_to_five(),
            WorkScheduleDay::new(),
            WorkScheduleDay::new(),
            WorkScheduleDay::new(),
            WorkScheduleDay::new(),
            WorkScheduleDay::new(),
            WorkScheduleDay::new(),
        ];
        let week = WorkScheduleWeek::new(monday_only, TimeUnit::Minutes, SimTime::ZERO).unwrap();
        // Sunday 12:00.
        let now = to_time(6.0 * 1440.0 + 720.0);
        let expected = 10080.0 - (6.0 * 1440.0 + 720.0) + 540.0;
        assert_eq!(
            week.query(now),
            ScheduleState::Inactive {
                wait: to_time(expected)
            }
        );
    }

    #[test]
    fn start_offset_shifts_the_week() {
        // Simulation starts at 09:00 Monday, so t = 0 is inside the shift.
        let week =
            WorkScheduleWeek::every_day(nine_to_five(), TimeUnit::Minutes, to_time(540.0)).unwrap();
        assert!(week.query(SimTime::ZERO).is_active());
        assert!(!week.query(to_time(8.0 * 60.0)).is_active());
    }

    #[test]
    fn hour_units_scale_steps() {
        let week = WorkScheduleWeek::every_day(nine_to_five(), TimeUnit::Hours, SimTime::ZERO).unwrap();
        assert!(week.query(to_time(10.0)).is_active());
        assert_eq!(week.week_length(), to_time(168.0));
    }

    #[test]
    fn empty_schedule_is_never_active() {
        let week = WorkScheduleWeek::new(Default::default(), TimeUnit::Minutes, SimTime::ZERO).unwrap();
        assert_eq!(
            week.query(to_time(100.0)),
            ScheduleState::Inactive {
                wait: to_time(10080.0)
            }
        );
    }

    #[test]
    fn weekday_parsing() {
        assert_eq!("monday".parse::<Weekday>().unwrap(), Weekday::Monday);
        assert_eq!("Sun".parse::<Weekday>().unwrap(), Weekday::Sunday);
        assert_eq!("4".parse::<Weekday>().unwrap(), Weekday::Friday);
        assert!("Funday".parse::<Weekday>().is_err());
        assert!("7".parse::<Weekday>().is_err());
    }
}
