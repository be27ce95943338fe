//! Simulation results in a tabular form: finished cloudlets and host utilization time series.

use std::fs::File;
use std::io::Write;

use serde::Serialize;

use crate::core::cloudlet::Cloudlet;
use crate::core::host::{Host, PowerAware};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CloudletReport {
    pub id: u64,
    pub job_id: u64,
    pub vm_id: Option<u32>,
    pub host_id: Option<u32>,
    pub status: String,
    pub length: i64,
    pub pes: u32,
    pub arrival_time: Option<f64>,
    pub start_time: Option<f64>,
    pub finish_time: Option<f64>,
    pub wait_time: Option<f64>,
    /// Storage size of the VM the cloudlet ran on.
    pub vm_size: Option<u64>,
}

impl CloudletReport {
    pub fn new(cloudlet: &Cloudlet, vm_size: Option<u64>) -> Self {
        Self {
            id: cloudlet.id,
            job_id: cloudlet.job_id,
            vm_id: cloudlet.vm_id,
            host_id: cloudlet.host_id(),
            status: cloudlet.status().to_string(),
            length: cloudlet.length,
            pes: cloudlet.pes,
            arrival_time: cloudlet.arrival_time(),
            start_time: cloudlet.exec_start_time(),
            finish_time: cloudlet.finish_time(),
            wait_time: cloudlet.wait_time(),
            vm_size,
        }
    }
}

/// One point of a host time series.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HostSampleReport {
    pub host_id: u32,
    pub time: f64,
    pub utilization: f64,
    /// Power estimated from the utilization, zero for an idle host.
    pub power: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HostReport {
    pub host_id: u32,
    pub name: String,
    /// Energy in joules consumed up to the report time.
    pub energy: f64,
    pub samples: Vec<HostSampleReport>,
}

impl HostReport {
    pub fn new(host: &Host, time: f64) -> Self {
        let samples = host
            .history()
            .samples()
            .iter()
            .map(|s| HostSampleReport {
                host_id: host.id,
                time: s.time,
                utilization: s.utilization,
                power: if s.utilization > 0. { host.power_at(s.utilization) } else { 0. },
            })
            .collect();
        Self {
            host_id: host.id,
            name: host.name.clone(),
            energy: host.energy_consumed(time),
            samples,
        }
    }
}

/// Writes report rows as CSV with a header line.
pub fn write_csv_to<W: Write, T: Serialize>(rows: &[T], writer: W) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_csv<T: Serialize>(rows: &[T], path: &str) -> Result<(), csv::Error> {
    write_csv_to(rows, File::create(path)?)
}
