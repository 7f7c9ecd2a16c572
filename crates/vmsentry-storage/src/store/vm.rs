use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
};
use vmsentry_alert::EntityFilter;
use vmsentry_common::types::EntityRef;

use crate::entities::{vm, vm_group_member};
use crate::error::Result;
use crate::store::{to_db_time, AlertStore};

fn to_entity(m: vm::Model) -> EntityRef {
    EntityRef {
        id: m.id,
        name: m.name,
        ip: m.ip,
        os_type: m.os_type,
        status: m.status,
        host_id: m.host_id,
        host_name: m.host_name,
        cluster_id: m.cluster_id,
        cluster_name: m.cluster_name,
        datacenter_id: m.datacenter_id,
    }
}

impl AlertStore {
    /// Inserts or refreshes a VM record. A previously deleted VM comes back.
    pub async fn upsert_vm(&self, entity: &EntityRef) -> Result<()> {
        let now = to_db_time(Utc::now());
        let existing = vm::Entity::find_by_id(entity.id.as_str())
            .one(self.db())
            .await?;
        match existing {
            Some(m) => {
                let mut am: vm::ActiveModel = m.into();
                am.name = Set(entity.name.clone());
                am.ip = Set(entity.ip.clone());
                am.os_type = Set(entity.os_type.clone());
                am.status = Set(entity.status.clone());
                am.host_id = Set(entity.host_id.clone());
                am.host_name = Set(entity.host_name.clone());
                am.cluster_id = Set(entity.cluster_id.clone());
                am.cluster_name = Set(entity.cluster_name.clone());
                am.datacenter_id = Set(entity.datacenter_id.clone());
                am.deleted_at = Set(None);
                am.updated_at = Set(now);
                am.update(self.db()).await?;
            }
            None => {
                let am = vm::ActiveModel {
                    id: Set(entity.id.clone()),
                    name: Set(entity.name.clone()),
                    ip: Set(entity.ip.clone()),
                    os_type: Set(entity.os_type.clone()),
                    status: Set(entity.status.clone()),
                    host_id: Set(entity.host_id.clone()),
                    host_name: Set(entity.host_name.clone()),
                    cluster_id: Set(entity.cluster_id.clone()),
                    cluster_name: Set(entity.cluster_name.clone()),
                    datacenter_id: Set(entity.datacenter_id.clone()),
                    deleted_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                am.insert(self.db()).await?;
            }
        }
        Ok(())
    }

    pub async fn delete_vm(&self, id: &str) -> Result<bool> {
        let Some(m) = vm::Entity::find_by_id(id)
            .filter(vm::Column::DeletedAt.is_null())
            .one(self.db())
            .await?
        else {
            return Ok(false);
        };
        let now = to_db_time(Utc::now());
        let mut am: vm::ActiveModel = m.into();
        am.deleted_at = Set(Some(now));
        am.updated_at = Set(now);
        am.update(self.db()).await?;
        Ok(true)
    }

    /// Adds a VM to a group. Returns `false` when it is already a member.
    pub async fn add_group_member(&self, group_id: &str, vm_id: &str) -> Result<bool> {
        let exists = vm_group_member::Entity::find()
            .filter(vm_group_member::Column::GroupId.eq(group_id))
            .filter(vm_group_member::Column::VmId.eq(vm_id))
            .one(self.db())
            .await?
            .is_some();
        if exists {
            return Ok(false);
        }
        let am = vm_group_member::ActiveModel {
            id: Set(vmsentry_common::id::next_id()),
            group_id: Set(group_id.to_string()),
            vm_id: Set(vm_id.to_string()),
            created_at: Set(to_db_time(Utc::now())),
        };
        am.insert(self.db()).await?;
        Ok(true)
    }

    pub async fn remove_group_member(&self, group_id: &str, vm_id: &str) -> Result<bool> {
        let res = vm_group_member::Entity::delete_many()
            .filter(vm_group_member::Column::GroupId.eq(group_id))
            .filter(vm_group_member::Column::VmId.eq(vm_id))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected > 0)
    }

    pub async fn get_vm(&self, id: &str) -> Result<Option<EntityRef>> {
        let model = vm::Entity::find_by_id(id)
            .filter(vm::Column::DeletedAt.is_null())
            .one(self.db())
            .await?;
        Ok(model.map(to_entity))
    }

    /// Lists live VMs matching a scope filter, ordered by name.
    pub async fn list_vms(&self, filter: &EntityFilter) -> Result<Vec<EntityRef>> {
        let mut q = vm::Entity::find().filter(vm::Column::DeletedAt.is_null());
        q = match filter {
            EntityFilter::All => q,
            EntityFilter::Cluster(id) => q.filter(vm::Column::ClusterId.eq(id.as_str())),
            EntityFilter::Host(id) => q.filter(vm::Column::HostId.eq(id.as_str())),
            EntityFilter::Datacenter(id) => q.filter(vm::Column::DatacenterId.eq(id.as_str())),
            EntityFilter::Group(id) => {
                let members: Vec<String> = vm_group_member::Entity::find()
                    .filter(vm_group_member::Column::GroupId.eq(id.as_str()))
                    .all(self.db())
                    .await?
                    .into_iter()
                    .map(|m| m.vm_id)
                    .collect();
                if members.is_empty() {
                    return Ok(Vec::new());
                }
                q.filter(vm::Column::Id.is_in(members))
            }
        };
        let rows = q.order_by(vm::Column::Name, Order::Asc).all(self.db()).await?;
        Ok(rows.into_iter().map(to_entity).collect())
    }
}
