pub mod alert_condition;
pub mod alert_record;
pub mod alert_rule;
pub mod metric_sample;
pub mod vm;
pub mod vm_group_member;
