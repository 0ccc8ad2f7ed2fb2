//! Schedule catalog
//!
//! Immutable built-in AWD calendars mapping planting method to an ordered
//! phase list. Transplanted crops run 14 weeks, direct-seeded 15. Phases are
//! strictly ordered by week, week 0 always exists, and the final phase is
//! harvest.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::types::{GrowthPhase, PlantingMethod};

/// One entry in an AWD calendar
#[derive(Debug, Clone, Serialize)]
pub struct SchedulePhase {
    /// Week offset from the crop start date
    pub week: u32,
    pub phase: GrowthPhase,
    /// Target depth (cm); negative means depth below the soil surface
    pub target_water_level_cm: f64,
    pub duration_days: u32,
    pub description: &'static str,
    pub requires_fertilizer: bool,
}

/// Ordered AWD calendar for one planting method
#[derive(Debug, Clone)]
pub struct Schedule {
    pub planting_method: PlantingMethod,
    pub total_weeks: u32,
    phases: Vec<SchedulePhase>,
}

impl Schedule {
    /// All phases in week order
    pub fn phases(&self) -> &[SchedulePhase] {
        &self.phases
    }

    /// The phase in effect at `week`: the last phase whose week is at or
    /// before it. Weeks past the calendar end resolve to harvest.
    pub fn current_phase(&self, week: u32) -> &SchedulePhase {
        self.phases
            .iter()
            .rev()
            .find(|p| p.week <= week)
            .unwrap_or(&self.phases[0])
    }

    /// The next phase after `week`, if the calendar has one
    pub fn next_phase(&self, week: u32) -> Option<&SchedulePhase> {
        self.phases.iter().find(|p| p.week > week)
    }

    /// When the field moves to its next phase. Once in the final phase this
    /// is the calendar end (`start + 7 * total_weeks` days).
    pub fn next_phase_date(&self, start_date: DateTime<Utc>, week: u32) -> DateTime<Utc> {
        match self.next_phase(week) {
            Some(next) => start_date + Duration::days(7 * i64::from(next.week)),
            None => start_date + Duration::days(7 * i64::from(self.total_weeks)),
        }
    }
}

fn phase(
    week: u32,
    phase: GrowthPhase,
    target_water_level_cm: f64,
    duration_days: u32,
    description: &'static str,
    requires_fertilizer: bool,
) -> SchedulePhase {
    SchedulePhase {
        week,
        phase,
        target_water_level_cm,
        duration_days,
        description,
        requires_fertilizer,
    }
}

fn transplanted() -> Schedule {
    use GrowthPhase::*;
    Schedule {
        planting_method: PlantingMethod::Transplanted,
        total_weeks: 14,
        phases: vec![
            phase(0, Preparation, 5.0, 7, "Land soaking and puddling", false),
            phase(1, Wetting, 5.0, 14, "Transplanting and establishment", true),
            phase(3, Drying, -15.0, 7, "First AWD drying cycle", false),
            phase(4, Wetting, 5.0, 14, "Tillering flood", true),
            phase(6, Drying, -15.0, 7, "Mid-tillering drying cycle", false),
            phase(7, Wetting, 7.0, 14, "Panicle initiation flood", true),
            phase(9, Drying, -15.0, 7, "Pre-flowering drying cycle", false),
            phase(10, Wetting, 10.0, 14, "Flowering flood", false),
            phase(12, Drying, -15.0, 14, "Terminal drainage", false),
            phase(14, Harvest, 0.0, 7, "Harvest", false),
        ],
    }
}

fn direct_seeded() -> Schedule {
    use GrowthPhase::*;
    Schedule {
        planting_method: PlantingMethod::DirectSeeded,
        total_weeks: 15,
        phases: vec![
            phase(0, Preparation, 0.0, 14, "Dry tillage and seeding", false),
            phase(2, Wetting, 3.0, 14, "Emergence flush", false),
            phase(4, Drying, -15.0, 7, "Establishment drying cycle", false),
            phase(5, Wetting, 5.0, 14, "Tillering flood", true),
            phase(7, Drying, -15.0, 7, "Mid-tillering drying cycle", false),
            phase(8, Wetting, 7.0, 14, "Panicle initiation flood", true),
            phase(10, Drying, -15.0, 7, "Pre-flowering drying cycle", false),
            phase(11, Wetting, 10.0, 14, "Flowering flood", false),
            phase(13, Drying, -15.0, 14, "Terminal drainage", false),
            phase(15, Harvest, 0.0, 7, "Harvest", false),
        ],
    }
}

/// Built-in calendar for a planting method
pub fn schedule_for(method: PlantingMethod) -> &'static Schedule {
    static TRANSPLANTED: OnceLock<Schedule> = OnceLock::new();
    static DIRECT_SEEDED: OnceLock<Schedule> = OnceLock::new();
    match method {
        PlantingMethod::Transplanted => TRANSPLANTED.get_or_init(transplanted),
        PlantingMethod::DirectSeeded => DIRECT_SEEDED.get_or_init(direct_seeded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendars_are_well_formed() {
        for method in [PlantingMethod::Transplanted, PlantingMethod::DirectSeeded] {
            let schedule = schedule_for(method);
            let phases = schedule.phases();

            assert_eq!(phases[0].week, 0, "week 0 must exist");
            assert_eq!(
                phases.last().unwrap().phase,
                GrowthPhase::Harvest,
                "last phase must be harvest"
            );
            for pair in phases.windows(2) {
                assert!(pair[0].week < pair[1].week, "phases must be strictly ordered");
            }
        }
    }

    #[test]
    fn current_phase_picks_last_at_or_before_week() {
        let schedule = schedule_for(PlantingMethod::Transplanted);
        assert_eq!(schedule.current_phase(0).phase, GrowthPhase::Preparation);
        assert_eq!(schedule.current_phase(2).phase, GrowthPhase::Wetting);
        assert_eq!(schedule.current_phase(3).phase, GrowthPhase::Drying);
        assert_eq!(schedule.current_phase(13).phase, GrowthPhase::Drying);
        assert_eq!(schedule.current_phase(14).phase, GrowthPhase::Harvest);
    }

    #[test]
    fn weeks_past_calendar_end_resolve_to_harvest() {
        let schedule = schedule_for(PlantingMethod::DirectSeeded);
        assert_eq!(schedule.current_phase(15).phase, GrowthPhase::Harvest);
        assert_eq!(schedule.current_phase(40).phase, GrowthPhase::Harvest);
    }

    #[test]
    fn phase_lookup_is_monotonic() {
        let schedule = schedule_for(PlantingMethod::Transplanted);
        let mut last_week = 0;
        for week in 0..30 {
            let phase = schedule.current_phase(week);
            assert!(phase.week >= last_week, "lookup went backwards at week {week}");
            last_week = phase.week;
        }
    }

    #[test]
    fn next_phase_date_advances_by_whole_weeks() {
        let schedule = schedule_for(PlantingMethod::Transplanted);
        let start = DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        // At week 1 the next phase starts week 3
        assert_eq!(
            schedule.next_phase_date(start, 1),
            start + Duration::days(21)
        );

        // In the final phase, the date is the calendar end
        assert_eq!(
            schedule.next_phase_date(start, 14),
            start + Duration::days(7 * 14)
        );
    }

    #[test]
    fn wetting_targets_are_positive_and_drying_negative() {
        for method in [PlantingMethod::Transplanted, PlantingMethod::DirectSeeded] {
            for phase in schedule_for(method).phases() {
                match phase.phase {
                    GrowthPhase::Wetting => assert!(phase.target_water_level_cm > 0.0),
                    GrowthPhase::Drying => assert!(phase.target_water_level_cm < 0.0),
                    _ => {}
                }
            }
        }
    }
}
