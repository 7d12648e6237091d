//! Shared fixture for tests spanning several collaborators.
//!
//! Cluster `c1` runs HDP-2.2 at 2.2.0.0 on hosts h1..h3 with ZooKeeper, HDFS
//! and Flume. HDP-2.2 ships the `upgrade-2.2` (same stack) and `upgrade-2.3`
//! (onto HDP-2.3) packs.

use std::sync::Arc;

use crate::cluster::{ClusterStore, HostResolver, MemoryClusterStore};
use crate::execution::MemoryScheduler;
use crate::inventory::Inventory;
use crate::model::{ClusterId, StackId, UpgradePack};
use crate::persistence::MemoryUpgradeStore;
use crate::stack::{MemoryStackRepository, StackRepository};

const INVENTORY: &str = r"
stacks:
  - id: HDP-2.2
    hooks_folder: HDP/2.0.6/hooks
    services:
      ZOOKEEPER:
        package_folder: common-services/ZOOKEEPER/3.4.5.2.0/package
        components:
          ZOOKEEPER_SERVER: { category: MASTER }
          ZOOKEEPER_CLIENT: { category: CLIENT }
        configurations:
          zoo.cfg: { tickTime: '2000', initLimit: '10' }
      HDFS:
        package_folder: common-services/HDFS/2.1.0.2.0/package
        components:
          NAMENODE: { category: MASTER }
          DATANODE: { category: SLAVE }
          HDFS_CLIENT: { category: CLIENT }
        configurations:
          hdfs-site:
            dfs.replication: '3'
            dfs.blocksize: '134217728'
          core-site:
            fs.defaultFS: hdfs://localhost:8020
      FLUME:
        package_folder: common-services/FLUME/1.4.0.2.0/package
        components:
          FLUME_HANDLER: { category: SLAVE }
        configurations:
          flume-conf: { agent.channels: mem }
    repository_versions:
      - { version: 2.2.0.0, upgrade_package: upgrade-2.2 }
      - { version: 2.2.1.0, upgrade_package: upgrade-2.2 }
    upgrade_packs:
      - name: upgrade-2.2
        target: 2.2.*.*
        target_stack: HDP-2.2
        groups:
          - name: ZOOKEEPER
            title: ZooKeeper
            kind: cluster
            stages:
              - title: Restart ZooKeeper
                service: ZOOKEEPER
                component: ZOOKEEPER_SERVER
                task: { type: restart }
              - title: Check HDFS
                service: HDFS
                task: { type: service_check }
      - name: upgrade-2.3
        target: 2.3.*.*
        target_stack: HDP-2.3
        groups:
          - name: PRE_CLUSTER
            title: Prepare Upgrade
            kind: cluster
            skippable: true
            stages:
              - title: Confirm backups
                direction: UPGRADE
                task:
                  type: manual
                  message: Back up the NameNode metadata of {{core-site/fs.defaultFS}}
              - title: Save namespace
                service: HDFS
                component: NAMENODE
                task:
                  type: execute
                  summary: Save the NameNode namespace
                  script: scripts/namenode.py
                  function: save_namespace
          - name: CORE_MASTER
            title: Core Masters
            kind: restart
            services:
              - name: ZOOKEEPER
                components: [ZOOKEEPER_SERVER]
              - name: HDFS
                components: [NAMENODE, DATANODE]
          - name: SERVICE_CHECK_1
            title: All Service Checks
            kind: service_check
            services:
              - name: ZOOKEEPER
              - name: YARN
              - name: HDFS
          - name: POST_CLUSTER
            title: Finalize Upgrade
            kind: cluster
            stages:
              - title: Update HDFS settings
                task:
                  type: configure
                  config_type: hdfs-site
                  set:
                    - { key: dfs.datanode.max.transfer.threads, value: '16384' }
              - title: Finalize
                task:
                  type: manual
                  summary: Finalize upgrade
                  message: The upgrade is ready to be finalized
        processing:
          - service: HDFS
            component: NAMENODE
            pre_upgrade:
              - type: execute
                summary: Prepare NameNode for upgrade
                script: scripts/namenode.py
                function: prepare_rolling_upgrade
              - type: configure
                summary: Raise handler count
                config_type: hdfs-site
                set:
                  - { key: dfs.namenode.handler.count, value: '100' }
  - id: HDP-2.3
    hooks_folder: HDP/2.0.6/hooks
    services:
      ZOOKEEPER:
        package_folder: common-services/ZOOKEEPER/3.4.5.2.0/package
        components:
          ZOOKEEPER_SERVER: { category: MASTER }
          ZOOKEEPER_CLIENT: { category: CLIENT }
        configurations:
          zoo.cfg: { tickTime: '2000', initLimit: '10' }
      HDFS:
        package_folder: common-services/HDFS/2.1.0.2.0/package
        components:
          NAMENODE: { category: MASTER }
          DATANODE: { category: SLAVE }
          HDFS_CLIENT: { category: CLIENT }
        configurations:
          hdfs-site:
            dfs.replication: '3'
            dfs.blocksize: '268435456'
            dfs.new.feature: 'true'
          core-site:
            fs.defaultFS: hdfs://localhost:8020
      FLUME:
        package_folder: common-services/FLUME/1.5.2.2.3/package
        components:
          FLUME_HANDLER: { category: SLAVE }
        configurations:
          flume-conf: { agent.channels: file }
    repository_versions:
      - { version: 2.3.0.0, upgrade_package: upgrade-2.3 }
clusters:
  - name: c1
    current_stack: HDP-2.2
    current_version: 2.2.0.0
    hosts: { h1: {}, h2: {}, h3: {} }
    services:
      ZOOKEEPER:
        components:
          ZOOKEEPER_SERVER: { hosts: [h1, h2] }
      HDFS:
        components:
          NAMENODE: { hosts: [h1] }
          DATANODE: { hosts: [h2, h3] }
      FLUME:
        components:
          FLUME_HANDLER: { hosts: [h3] }
    desired_configs:
      hdfs-site:
        dfs.replication: '2'
        dfs.blocksize: '134217728'
        dfs.custom.setting: abc
      core-site:
        fs.defaultFS: hdfs://h1:8020
      zoo.cfg:
        tickTime: '2000'
      flume-conf:
        agent.channels: memch
      cluster-env:
        security_enabled: 'false'
";

pub struct TestEnv {
    pub store: Arc<MemoryClusterStore>,
    pub stacks: Arc<MemoryStackRepository>,
    pub scheduler: Arc<MemoryScheduler>,
    pub upgrades: Arc<MemoryUpgradeStore>,
    pub cluster: ClusterId,
}

impl TestEnv {
    pub fn resolver(&self) -> HostResolver {
        HostResolver::new(self.store.clone(), self.cluster)
    }

    /// Pack `name` shipped with `stack`.
    pub fn pack(&self, stack: &str, name: &str) -> UpgradePack {
        self.stacks
            .upgrade_packs(&StackId::parse(stack).unwrap())
            .unwrap()
            .remove(name)
            .unwrap_or_else(|| panic!("pack {name} not defined in {stack}"))
    }
}

/// Fresh collaborators loaded from the fixture inventory.
pub fn env() -> TestEnv {
    let env = Inventory::from_yaml(INVENTORY).unwrap().build().unwrap();
    let cluster = env.store.cluster_id("c1").unwrap();
    TestEnv {
        store: env.store,
        stacks: env.stacks,
        scheduler: env.scheduler,
        upgrades: env.upgrades,
        cluster,
    }
}
