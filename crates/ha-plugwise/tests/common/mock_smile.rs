//! Scripted Smile client

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ha_plugwise::{PlugwiseData, PlugwiseError, SmileApi, SmileInfo};

use super::SmileFixture;

/// A Smile that replays a fixture.
///
/// Connect and update results can be scripted; commands are recorded and
/// switch commands are applied to the data the next poll returns.
pub struct MockSmile {
    info: Mutex<SmileInfo>,
    data: Mutex<PlugwiseData>,
    connect_result: Mutex<Result<bool, PlugwiseError>>,
    connect_delay: Mutex<Option<Duration>>,
    update_script: Mutex<VecDeque<Result<PlugwiseData, PlugwiseError>>>,
    update_delay: Mutex<Option<Duration>>,
    delete_result: Mutex<Result<(), PlugwiseError>>,
    connect_calls: AtomicUsize,
    update_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl MockSmile {
    pub fn new(fixture: SmileFixture) -> Self {
        Self {
            info: Mutex::new(fixture.info),
            data: Mutex::new(fixture.data),
            connect_result: Mutex::new(Ok(true)),
            connect_delay: Mutex::new(None),
            update_script: Mutex::new(VecDeque::new()),
            update_delay: Mutex::new(None),
            delete_result: Mutex::new(Ok(())),
            connect_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connect_result(&self, result: Result<bool, PlugwiseError>) {
        *self.connect_result.lock().unwrap() = result;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_update_delay(&self, delay: Duration) {
        *self.update_delay.lock().unwrap() = Some(delay);
    }

    /// Queue an error for the next poll; the fixture data answers once the queue is empty
    pub fn fail_next_update(&self, err: PlugwiseError) {
        self.update_script.lock().unwrap().push_back(Err(err));
    }

    pub fn set_delete_result(&self, result: Result<(), PlugwiseError>) {
        *self.delete_result.lock().unwrap() = result;
    }

    pub fn set_info(&self, update: impl FnOnce(&mut SmileInfo)) {
        update(&mut *self.info.lock().unwrap());
    }

    pub fn modify_data(&self, update: impl FnOnce(&mut PlugwiseData)) {
        update(&mut *self.data.lock().unwrap());
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmileApi for MockSmile {
    async fn connect(&self) -> Result<bool, PlugwiseError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.connect_result.lock().unwrap().clone()
    }

    fn info(&self) -> SmileInfo {
        self.info.lock().unwrap().clone()
    }

    async fn update(&self) -> Result<PlugwiseData, PlugwiseError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.update_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.update_script.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(self.data.lock().unwrap().clone()),
        }
    }

    async fn delete_notification(&self) -> Result<(), PlugwiseError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.delete_result.lock().unwrap().clone();
        if result.is_ok() {
            self.data.lock().unwrap().gateway.notifications.clear();
        }
        result
    }

    async fn set_switch_state(
        &self,
        device_id: &str,
        switch: &str,
        on: bool,
    ) -> Result<(), PlugwiseError> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("set_switch_state {device_id} {switch} {on}"));
        let mut data = self.data.lock().unwrap();
        let device = data
            .devices
            .get_mut(device_id)
            .ok_or_else(|| PlugwiseError::ResponseError(format!("unknown device {device_id}")))?;
        device.switches.insert(switch.to_string(), on);
        Ok(())
    }

    async fn set_temperature(&self, device_id: &str, setpoint: f64) -> Result<(), PlugwiseError> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("set_temperature {device_id} {setpoint}"));
        let mut data = self.data.lock().unwrap();
        let device = data
            .devices
            .get_mut(device_id)
            .ok_or_else(|| PlugwiseError::ResponseError(format!("unknown device {device_id}")))?;
        if let Some(thermostat) = device.thermostat.as_mut() {
            thermostat.setpoint = setpoint;
        }
        Ok(())
    }
}
