//! Catalogue of the helpdesk REST resources.
//!
//! Payloads are passed through as JSON; the client does not interpret them.

use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Endpoint {
    Equipment,
    Tickets,
    Comments,
    Users,

    // Reports
    FrequentIssues,
    TurnaroundTime,
    EquipmentStatus,

    // Analytics
    EquipmentFailurePatterns,
    SchoolIssues,
    PreventiveMaintenance,
    EquipmentHealth,
    IssuePatterns,
    MaintenanceSchedule,
    MaintenanceBudget,
}

impl Endpoint {
    pub const ALL: [Endpoint; 14] = [
        Endpoint::Equipment,
        Endpoint::Tickets,
        Endpoint::Comments,
        Endpoint::Users,
        Endpoint::FrequentIssues,
        Endpoint::TurnaroundTime,
        Endpoint::EquipmentStatus,
        Endpoint::EquipmentFailurePatterns,
        Endpoint::SchoolIssues,
        Endpoint::PreventiveMaintenance,
        Endpoint::EquipmentHealth,
        Endpoint::IssuePatterns,
        Endpoint::MaintenanceSchedule,
        Endpoint::MaintenanceBudget,
    ];

    /// Path relative to the base URL, with trailing slash.
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Equipment => "api/equipment/",
            Endpoint::Tickets => "api/tickets/",
            Endpoint::Comments => "api/comments/",
            Endpoint::Users => "api/users/",
            Endpoint::FrequentIssues => "api/reports/frequent-issues/",
            Endpoint::TurnaroundTime => "api/reports/turnaround-time/",
            Endpoint::EquipmentStatus => "api/reports/equipment-status/",
            Endpoint::EquipmentFailurePatterns => "api/analytics/equipment-failure-patterns/",
            Endpoint::SchoolIssues => "api/analytics/school-issues/",
            Endpoint::PreventiveMaintenance => "api/analytics/preventive-maintenance/",
            Endpoint::EquipmentHealth => "api/analytics/equipment-health/",
            Endpoint::IssuePatterns => "api/analytics/issue-patterns/",
            Endpoint::MaintenanceSchedule => "api/analytics/maintenance-schedule/",
            Endpoint::MaintenanceBudget => "api/analytics/maintenance-budget/",
        }
    }

    /// Collections support addressing a single record by id.
    pub fn is_collection(self) -> bool {
        matches!(
            self,
            Endpoint::Equipment | Endpoint::Tickets | Endpoint::Comments | Endpoint::Users
        )
    }

    /// Path of one record in a collection, e.g. `api/tickets/7/`.
    pub fn record_path(self, id: u64) -> anyhow::Result<String> {
        if !self.is_collection() {
            anyhow::bail!("{} is a report, not a collection; it has no records", self.path());
        }
        Ok(format!("{}{}/", self.path(), id))
    }
}
