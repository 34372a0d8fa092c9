use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use aq_sensors::bmp280::{FilterConstant, MeasurementMode, Oversampling, StandbyPeriod};
use aq_sensors::ccs811::SamplePeriod;
use aq_sensors::hdc1080::{HumidityResolution, Measurement, TemperatureResolution};
use aq_sensors::{AddressPin, Bmp280, Ccs811, Hdc1080, MetricsHub};
use bus_transport::MockRegisterBus;
use register_codec::FieldValue;

mod config;
mod sink;

use config::{load_config, SamplerConfig};
use sink::{JsonlSink, SampleRecord};

#[derive(Parser, Debug)]
#[command(name = "aq-sampler", about = "Air-quality sensor sampling loop")]
struct Args {
    /// YAML config path; built-in defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the in-process mock bus backend (portable; no hardware needed)
    #[arg(long, action = ArgAction::SetTrue)]
    mock: bool,

    /// Override the sampling period in seconds
    #[arg(long)]
    period_s: Option<f64>,

    /// Override the JSON-lines output path
    #[arg(long)]
    out: Option<PathBuf>,

    /// Number of sampling rounds to run; 0 means run until killed
    #[arg(long, default_value_t = 0u64)]
    rounds: u64,
}

fn main() -> Result<()> {
    setup_tracing();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => SamplerConfig::default(),
    };
    if let Some(period) = args.period_s {
        cfg.period_s = period;
    }
    if let Some(out) = &args.out {
        cfg.output = out.clone();
    }

    let metrics = MetricsHub::new().map_err(|e| anyhow!("metrics init failed: {e}"))?;
    let mut sink = JsonlSink::open(&cfg.output)?;
    info!(
        period_s = cfg.period_s,
        output = %cfg.output.display(),
        mock = args.mock,
        "aq-sampler starting"
    );

    let mut fleet = Fleet::bring_up(&cfg, args.mock, &metrics)?;
    if fleet.is_empty() {
        return Err(anyhow!(
            "no sensors enabled; enable some in the config or pass --mock"
        ));
    }

    let period = Duration::from_secs_f64(cfg.period_s);
    let mut round = 0u64;
    loop {
        let started = Instant::now();
        for record in fleet.poll(&cfg, &metrics) {
            if let Err(e) = sink.append(&record) {
                error!(error = %e, "failed to persist sample");
            }
        }
        round += 1;
        if args.rounds != 0 && round >= args.rounds {
            break;
        }
        let elapsed = started.elapsed();
        if elapsed < period {
            std::thread::sleep(period - elapsed);
        }
    }

    info!(
        samples = metrics.sampler.samples.get(),
        errors = metrics.sampler.sample_errors.get(),
        retries = metrics.sampler.retries.get(),
        "sampling finished"
    );
    debug!("final metrics:\n{}", metrics.encode_text());
    Ok(())
}

/// The set of sensors this process polls. Everything is single-threaded
/// and blocking; one poll round touches each sensor in turn.
struct Fleet {
    bmp280: Option<Bmp280<MockRegisterBus>>,
    ccs811: Option<Ccs811<MockRegisterBus>>,
    hdc1080: Option<Hdc1080<MockRegisterBus>>,
    #[cfg(feature = "serial")]
    s8: Option<aq_sensors::SenseairS8<bus_transport::SerialPortLink>>,
    #[cfg(feature = "serial")]
    pms7003: Option<aq_sensors::Pms7003<bus_transport::SerialPortLink>>,
}

impl Fleet {
    fn bring_up(cfg: &SamplerConfig, mock: bool, metrics: &MetricsHub) -> Result<Self> {
        let mut fleet = Self {
            bmp280: None,
            ccs811: None,
            hdc1080: None,
            #[cfg(feature = "serial")]
            s8: None,
            #[cfg(feature = "serial")]
            pms7003: None,
        };

        if mock {
            fleet.bring_up_i2c(cfg)?;
        } else if cfg.bmp280.enabled || cfg.ccs811.enabled || cfg.hdc1080.enabled {
            // I2C wire backends are supplied by the integrating platform;
            // this binary only ships the portable mock.
            warn!("I2C sensors need a platform bus backend; pass --mock to run them in-process");
        }

        fleet.bring_up_serial(cfg, mock)?;

        metrics
            .sampler
            .sensors_enabled
            .set(fleet.enabled_count() as i64);
        Ok(fleet)
    }

    fn bring_up_i2c(&mut self, cfg: &SamplerConfig) -> Result<()> {
        if cfg.bmp280.enabled {
            let pin = address_pin(cfg.bmp280.address_pin_high);
            let mut bmp = Bmp280::new(seeded_bmp280_bus(), pin)?;
            bmp.probe()?;
            bmp.reset()?;
            bmp.set_config(StandbyPeriod::Ms1000, FilterConstant::X2, false)?;
            bmp.set_sampling(Oversampling::X2, Oversampling::X16, MeasurementMode::Sleep)?;
            info!(address = bmp.bus_address(), "bmp280 ready");
            self.bmp280 = Some(bmp);
        }
        if cfg.ccs811.enabled {
            let pin = address_pin(cfg.ccs811.address_pin_high);
            let mut ccs = Ccs811::new(seeded_ccs811_bus(), pin)?;
            ccs.probe()?;
            ccs.start_app()?;
            ccs.set_drive_mode(SamplePeriod::EverySecond, false, false)?;
            info!(address = ccs.bus_address(), "ccs811 ready");
            self.ccs811 = Some(ccs);
        }
        if cfg.hdc1080.enabled {
            let pin = address_pin(cfg.hdc1080.address_pin_high);
            let mut hdc = Hdc1080::new(seeded_hdc1080_bus(), pin)?;
            hdc.probe()?;
            hdc.set_config(
                false,
                TemperatureResolution::Bits14,
                HumidityResolution::Bits14,
                true,
                false,
            )?;
            info!("hdc1080 ready");
            self.hdc1080 = Some(hdc);
        }
        Ok(())
    }

    #[cfg(feature = "serial")]
    fn bring_up_serial(&mut self, cfg: &SamplerConfig, mock: bool) -> Result<()> {
        use bus_transport::SerialPortLink;
        if mock {
            if cfg.s8.enabled || cfg.pms7003.enabled {
                warn!("serial sensors are skipped under the mock backend");
            }
            return Ok(());
        }
        if cfg.s8.enabled {
            let port = cfg
                .s8
                .port
                .as_deref()
                .ok_or_else(|| anyhow!("s8 enabled but no serial port configured"))?;
            // 9600 baud, timeout of at least 200 ms, per datasheet
            let link = SerialPortLink::open(port, 9600, Duration::from_secs(1))?;
            self.s8 = Some(aq_sensors::SenseairS8::new(link)?);
            info!(port, "senseair s8 ready");
        }
        if cfg.pms7003.enabled {
            let port = cfg
                .pms7003
                .port
                .as_deref()
                .ok_or_else(|| anyhow!("pms7003 enabled but no serial port configured"))?;
            // 9600 baud, timeout >= 2.3 s between active-mode frames
            let link = SerialPortLink::open(port, 9600, Duration::from_secs(3))?;
            self.pms7003 = Some(aq_sensors::Pms7003::new(link)?);
            info!(port, "pms7003 ready");
        }
        Ok(())
    }

    #[cfg(not(feature = "serial"))]
    fn bring_up_serial(&mut self, cfg: &SamplerConfig, _mock: bool) -> Result<()> {
        if cfg.s8.enabled || cfg.pms7003.enabled {
            warn!("serial sensors require the `serial` feature; skipping");
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.enabled_count() == 0
    }

    fn enabled_count(&self) -> usize {
        let mut n = usize::from(self.bmp280.is_some())
            + usize::from(self.ccs811.is_some())
            + usize::from(self.hdc1080.is_some());
        #[cfg(feature = "serial")]
        {
            n += usize::from(self.s8.is_some()) + usize::from(self.pms7003.is_some());
        }
        n
    }

    /// One polling round: each enabled sensor in turn, with bounded
    /// retries. Exhausted retries invalidate that sensor's caches so the
    /// next round starts from an all-unknown state.
    fn poll(&mut self, cfg: &SamplerConfig, metrics: &MetricsHub) -> Vec<SampleRecord> {
        let mut records = Vec::new();
        let mut ambient: Option<(f64, f64)> = None;

        if let Some(hdc) = self.hdc1080.as_mut() {
            let fields = with_retries("hdc1080", cfg.max_retries, metrics, || {
                let reading = hdc.read_measurement(Measurement::Both)?;
                let mut fields = BTreeMap::new();
                if let Some(t) = reading.temperature_c {
                    fields.insert("temperature_c", FieldValue::F64(t));
                }
                if let Some(rh) = reading.humidity_pct {
                    fields.insert("humidity_pct", FieldValue::F64(rh));
                }
                Ok((reading, fields))
            });
            match fields {
                Some((reading, fields)) => {
                    if let (Some(t), Some(rh)) = (reading.temperature_c, reading.humidity_pct) {
                        ambient = Some((rh, t));
                    }
                    metrics.sampler.samples.inc();
                    records.push(SampleRecord::now("hdc1080", fields));
                }
                None => {
                    hdc.invalidate_caches();
                    metrics.sampler.cache_resets.inc();
                }
            }
        }

        if let Some(ccs) = self.ccs811.as_mut() {
            // feed ambient conditions into the gas compensation first
            if let Some((rh, t)) = ambient {
                if let Err(e) = ccs.set_environment(rh, t) {
                    warn!(error = %e, "ccs811 environment update failed");
                }
            }
            let fields = with_retries("ccs811", cfg.max_retries, metrics, || {
                let aq = ccs.read_air_quality()?;
                let mut fields = BTreeMap::new();
                fields.insert("eco2_ppm", FieldValue::U64(aq.eco2_ppm));
                fields.insert("tvoc_ppb", FieldValue::U64(aq.tvoc_ppb));
                Ok(fields)
            });
            match fields {
                Some(fields) => {
                    metrics.sampler.samples.inc();
                    records.push(SampleRecord::now("ccs811", fields));
                }
                None => {
                    ccs.invalidate_caches();
                    metrics.sampler.cache_resets.inc();
                }
            }
        }

        if let Some(bmp) = self.bmp280.as_mut() {
            let fields = with_retries("bmp280", cfg.max_retries, metrics, || {
                let data = bmp.measure(Oversampling::X2, Oversampling::X16)?;
                let mut fields = BTreeMap::new();
                fields.insert("pressure_raw", FieldValue::U64(data.pressure));
                fields.insert("temperature_raw", FieldValue::U64(data.temperature));
                Ok(fields)
            });
            match fields {
                Some(fields) => {
                    metrics.sampler.samples.inc();
                    records.push(SampleRecord::now("bmp280", fields));
                }
                None => {
                    bmp.invalidate_caches();
                    metrics.sampler.cache_resets.inc();
                }
            }
        }

        #[cfg(feature = "serial")]
        self.poll_serial(cfg, metrics, &mut records);

        records
    }

    #[cfg(feature = "serial")]
    fn poll_serial(
        &mut self,
        cfg: &SamplerConfig,
        metrics: &MetricsHub,
        records: &mut Vec<SampleRecord>,
    ) {
        if let Some(s8) = self.s8.as_mut() {
            let fields = with_retries("s8", cfg.max_retries, metrics, || {
                let ppm = s8.read_co2()?;
                let mut fields = BTreeMap::new();
                fields.insert("co2_ppm", FieldValue::U64(ppm));
                Ok(fields)
            });
            match fields {
                Some(fields) => {
                    metrics.sampler.samples.inc();
                    records.push(SampleRecord::now("s8", fields));
                }
                None => {
                    s8.clear_values();
                    metrics.sampler.cache_resets.inc();
                }
            }
        }
        if let Some(pms) = self.pms7003.as_mut() {
            let fields = with_retries("pms7003", cfg.max_retries, metrics, || {
                Ok(pms.read()?.data_values())
            });
            match fields {
                Some(fields) => {
                    metrics.sampler.samples.inc();
                    records.push(SampleRecord::now("pms7003", fields));
                }
                None => {
                    pms.clear_last();
                    metrics.sampler.cache_resets.inc();
                }
            }
        }
    }
}

fn address_pin(high: bool) -> AddressPin {
    if high {
        AddressPin::High
    } else {
        AddressPin::Low
    }
}

/// Run `op` up to `max_retries + 1` times. Returns `None` when every
/// attempt failed; the caller then resets the sensor's caches.
fn with_retries<T>(
    sensor: &'static str,
    max_retries: u32,
    metrics: &MetricsHub,
    mut op: impl FnMut() -> aq_sensors::Result<T>,
) -> Option<T> {
    for attempt in 0..=max_retries {
        match op() {
            Ok(value) => return Some(value),
            Err(e) => {
                warn!(sensor, attempt, error = %e, "sensor poll failed");
                if attempt < max_retries {
                    metrics.sampler.retries.inc();
                }
            }
        }
    }
    error!(sensor, "retries exhausted, resetting caches");
    metrics.sampler.sample_errors.inc();
    None
}

/// Mock register space with plausible BMP280 contents.
fn seeded_bmp280_bus() -> MockRegisterBus {
    let mut bus = MockRegisterBus::new();
    bus.set_register(0xD0, &[0x58]);
    bus.set_register(0xF3, &[0x00]);
    bus.set_register(0xF7, &[0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00]);
    bus.set_register(
        0x88,
        &[
            0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27, 0x0B,
            0x8C, 0x00, 0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17,
        ],
    );
    bus
}

/// Mock register space with plausible CCS811 contents.
fn seeded_ccs811_bus() -> MockRegisterBus {
    let mut bus = MockRegisterBus::new();
    bus.set_register(0x00, &[0b1001_1000]);
    bus.set_register(0x02, &[0x01, 0x90, 0x00, 0x20]);
    bus.set_register(0x20, &[0x81]);
    bus
}

/// Mock register space with plausible HDC1080 contents.
fn seeded_hdc1080_bus() -> MockRegisterBus {
    let mut bus = MockRegisterBus::new();
    bus.set_register(0xFF, &[0x10, 0x50]);
    bus.set_register(0xFE, &[0x54, 0x49]);
    bus.set_register(0xFB, &[0x01, 0x02, 0x03, 0x04, 0x05, 0x00]);
    bus.set_register(0x00, &[0x66, 0x66, 0x80, 0x00]);
    bus.set_register(0x01, &[0x80, 0x00]);
    bus
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
