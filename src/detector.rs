//! The streaming detector aggregate.
//!
//! One exclusively-owned value holding every sub-component state: front
//! ends, feature extractors, statistics, calibration, fusion, the state
//! machine, and the context ring. A caller drives it with arbitrary-size
//! sample chunks; all allocation happens in [`SyllableDetector::new`] and
//! the per-sample path never allocates, blocks, or fails.
//!
//! Per-sample order: AGC, voicing front-end, feature extractors,
//! statistics, calibration (dormant phase), fusion, state machine,
//! context ring emission.

use log::info;

use crate::calibration::{chan, Calibrator, CAL_CHANNELS};
use crate::config::{ConfigError, DetectorConfig};
use crate::dsp::utils::ema_alpha;
use crate::dsp::{
    Agc, HighFreqEnergy, LocalEnergyRatio, MelCepstrum, MorletBank, NoiseFloorTracker,
    PeakRateExtractor, SpectralAnalyzer, SpectralFlux, TeagerOperator, VoicingFrontEnd,
};
use crate::event::SyllableEvent;
use crate::fusion::{FusionEngine, N_FEATURES};
use crate::prominence::EventRing;
use crate::state_machine::{StepInput, SyllableTracker};
use crate::stats::{FeatureStats, NormalizationMode};

/// Instantaneous energy smoothing window.
const ENERGY_TAU_MS: f32 = 10.0;
/// High-frequency energy below this absolute level (about -30 dBFS) is
/// filter leakage, not frication; its normalized value reads 0 so voiced
/// onsets are not mislabeled MIXED and silence cannot fake an unvoiced
/// trigger.
const HF_DECISION_FLOOR: f32 = 1e-3;
/// Morlet bank span and size.
const WAVELET_F_MIN_HZ: f32 = 2000.0;
const WAVELET_F_MAX_HZ: f32 = 6000.0;
const WAVELET_SCALES: usize = 3;

pub struct SyllableDetector {
    config: DetectorConfig,

    // Front ends
    agc: Agc,
    voicing: VoicingFrontEnd,

    // Feature extractors
    peak_rate: PeakRateExtractor,
    analyzer: SpectralAnalyzer,
    flux: SpectralFlux,
    mel: MelCepstrum,
    high_freq: HighFreqEnergy,
    wavelet: MorletBank,
    teager: TeagerOperator,
    ler: LocalEnergyRatio,

    // Energy tracking
    energy_alpha: f32,
    energy: f32,
    noise_floor: NoiseFloorTracker,

    // Latest framed values, held between hops
    held_flux: f32,
    held_mfcc_delta: f32,
    held_flatness_weber: f32,

    // Running statistics, one per fusion feature
    stats: [FeatureStats; N_FEATURES],
    norm_mode: NormalizationMode,

    // Decision stages
    calibrator: Calibrator,
    fusion: FusionEngine,
    tracker: SyllableTracker,
    ring: EventRing,

    realtime: bool,
    total_samples: u64,
}

impl SyllableDetector {
    /// Build a detector. All buffers, filter tables, and FFT plans are
    /// allocated here; nothing allocates afterwards.
    pub fn new(config: DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let sr = config.sample_rate;
        let fft_size = config.fft_size_samples();
        let hop_size = config.hop_size_samples().min(fft_size);

        // Per-sample features update at the sample rate, framed features
        // at the hop rate; both get the same wall-clock time constant.
        let sample_alpha = ema_alpha(config.adaptive_peak_rate_tau_ms, sr);
        let hop_rate = sr / hop_size as f32;
        let hop_alpha = ema_alpha(config.adaptive_peak_rate_tau_ms, hop_rate);
        let stats = [
            FeatureStats::new(sample_alpha, sr),
            FeatureStats::new(hop_alpha, hop_rate),
            FeatureStats::new(sample_alpha, sr),
            FeatureStats::new(hop_alpha, hop_rate),
            FeatureStats::new(sample_alpha, sr),
        ];

        let fusion = FusionEngine::new(
            [
                config.weight_peak_rate,
                config.weight_spectral_flux,
                config.weight_high_freq,
                config.weight_mfcc,
                config.weight_wavelet,
            ],
            [
                config.enable_peak_rate,
                config.enable_spectral_flux,
                config.enable_high_freq,
                config.enable_mfcc,
                config.enable_wavelet,
            ],
            config.fusion_blend_alpha,
        );

        let tracker = SyllableTracker::new(
            sr,
            config.threshold_peak_rate,
            config.adaptive_peak_rate_k,
            config.hysteresis_on_factor,
            config.hysteresis_off_factor,
            config.unvoiced_onset_threshold,
            config.allow_unvoiced_onsets,
            config.min_syllable_dist_samples(),
            config.realtime_mode,
        );

        let mut calibrator = Calibrator::new(
            config.calibration_target_samples(),
            config.snr_threshold_db,
        );
        if config.realtime_mode {
            calibrator.start();
            info!(
                "realtime mode: calibrating for {} ms",
                config.calibration_duration_ms
            );
        }

        Ok(Self {
            agc: Agc::new(sr),
            voicing: VoicingFrontEnd::new(sr, config.voiced_hold_ms),
            peak_rate: PeakRateExtractor::new(
                config.peak_rate_band_min_hz,
                config.peak_rate_band_max_hz,
                sr,
            ),
            analyzer: SpectralAnalyzer::new(fft_size, hop_size),
            flux: SpectralFlux::new(fft_size),
            mel: MelCepstrum::new(fft_size, sr),
            high_freq: HighFreqEnergy::new(config.high_freq_cutoff_hz, config.fft_size_ms, sr),
            wavelet: MorletBank::new(sr, WAVELET_F_MIN_HZ, WAVELET_F_MAX_HZ, WAVELET_SCALES),
            teager: TeagerOperator::new(config.adaptive_peak_rate_tau_ms, sr),
            ler: LocalEnergyRatio::new(sr),
            energy_alpha: ema_alpha(ENERGY_TAU_MS, sr),
            energy: 0.0,
            noise_floor: NoiseFloorTracker::new(sr),
            held_flux: 0.0,
            held_mfcc_delta: 0.0,
            held_flatness_weber: 0.0,
            stats,
            norm_mode: NormalizationMode::Sigmoid,
            calibrator,
            fusion,
            tracker,
            ring: EventRing::new(sr, config.context_size),
            realtime: config.realtime_mode,
            total_samples: 0,
            config,
        })
    }

    /// Feed a chunk of mono samples in [-1, 1]. Detected syllables are
    /// written into `out`; the return value is how many. Events that do
    /// not fit remain buffered and surface on later calls.
    pub fn process(&mut self, input: &[f32], out: &mut [SyllableEvent]) -> usize {
        let mut written = 0usize;

        for &sample in input {
            // Non-finite samples enter the chain as silence; everything
            // downstream assumes finite filter state.
            let sample = if sample.is_finite() { sample } else { 0.0 };
            let x = if self.config.enable_agc {
                self.agc.process(sample)
            } else {
                sample
            };
            let clock = self.total_samples;
            self.total_samples += 1;

            let voicing = self.voicing.process(x);

            self.energy += self.energy_alpha * (x * x - self.energy);
            let floor = self.noise_floor.process(self.energy);

            let (_env, pr) = self.peak_rate.process(x);
            let hf = self.high_freq.process(x);
            let wv = self.wavelet.process(x);
            let teager = self.teager.process(x);
            let ler = self.ler.process(x);

            let new_frame = self.analyzer.push(x);
            if new_frame {
                let frame = self.flux.update(self.analyzer.magnitudes());
                self.held_flux = frame.flux;
                self.held_flatness_weber = frame.flatness_weber;
                self.held_mfcc_delta = self.mel.update(self.analyzer.power());
            }

            let raw = [pr, self.held_flux, hf, self.held_mfcc_delta, wv];

            // Statistics advance only when their extractor produced a new
            // value this sample or hop.
            self.stats[chan::PEAK_RATE].update(pr);
            self.stats[chan::HIGH_FREQ].update(hf);
            self.stats[chan::WAVELET].update(wv);
            if new_frame {
                self.stats[chan::SPECTRAL_FLUX].update(self.held_flux);
                self.stats[chan::MFCC_DELTA].update(self.held_mfcc_delta);
            }

            // Calibration phase: collect the raw frame, stay dormant.
            if self.calibrator.is_calibrating() {
                let mut frame = [0.0f32; CAL_CHANNELS];
                frame[..N_FEATURES].copy_from_slice(&raw);
                frame[chan::ENERGY] = self.energy;
                self.calibrator.push(frame);
                continue;
            }

            let sf_norm = self.stats[chan::SPECTRAL_FLUX].normalized(raw[1], self.norm_mode);
            let hf_norm = if raw[2] > HF_DECISION_FLOOR {
                self.stats[chan::HIGH_FREQ].normalized(raw[2], self.norm_mode)
            } else {
                0.0
            };

            let fusion_score = if self.realtime {
                self.fusion
                    .realtime(&raw, self.calibrator.thresholds(), voicing.confidence)
            } else {
                let mut norms = [0.0f32; N_FEATURES];
                let mut confs = [0.0f32; N_FEATURES];
                for k in 0..N_FEATURES {
                    norms[k] = self.stats[k].normalized(raw[k], self.norm_mode);
                    confs[k] = self.stats[k].confidence();
                }
                // Sub-floor high-frequency leakage reads 0 here too.
                norms[chan::HIGH_FREQ] = hf_norm;
                self.fusion.offline(&norms, &confs, self.energy, floor)
            };
            let theta = self.tracker.peak_rate_theta(
                self.stats[chan::PEAK_RATE].mean(),
                self.stats[chan::PEAK_RATE].sigma(),
            );

            let energy_threshold = if self.realtime && self.calibrator.is_finalized() {
                Some(self.calibrator.thresholds()[chan::ENERGY])
            } else {
                None
            };

            let step = StepInput {
                clock,
                raw,
                peak_rate_threshold: theta,
                fusion: fusion_score,
                sf_norm,
                hf_norm,
                voiced: voicing.voiced,
                f0: voicing.f0,
                semitones_above_baseline: voicing.semitones_above_baseline,
                energy: self.energy,
                teager_z: teager.z,
                ler,
                flatness_weber: self.held_flatness_weber,
                energy_threshold,
            };

            if let Some(finalized) = self.tracker.step(&step) {
                self.ring.push(finalized);
            }

            let required = if self.realtime {
                0
            } else {
                self.config.context_size
            };
            while written < out.len() {
                match self.ring.pop(required, false) {
                    Some(ev) => {
                        out[written] = ev;
                        written += 1;
                    }
                    None => break,
                }
            }
        }

        written
    }

    /// Finalize any in-flight syllable and drain everything still waiting
    /// for context. Flushed events use the flush accent threshold.
    pub fn flush(&mut self, out: &mut [SyllableEvent]) -> usize {
        if let Some(finalized) = self.tracker.flush_in_flight(self.total_samples) {
            self.ring.push(finalized);
        }

        let mut written = 0usize;
        while written < out.len() {
            match self.ring.pop(0, true) {
                Some(ev) => {
                    out[written] = ev;
                    written += 1;
                }
                None => break,
            }
        }
        written
    }

    /// Return to the post-construction state. Filter coefficients and
    /// configuration survive; counters, statistics, and buffers clear.
    /// With realtime mode active this restarts calibration.
    pub fn reset(&mut self) {
        self.agc.reset();
        self.voicing.reset();
        self.peak_rate.reset();
        self.analyzer.reset();
        self.flux.reset();
        self.mel.reset();
        self.high_freq.reset();
        self.wavelet.reset();
        self.teager.reset();
        self.ler.reset();
        self.energy = 0.0;
        self.noise_floor.reset();
        self.held_flux = 0.0;
        self.held_mfcc_delta = 0.0;
        self.held_flatness_weber = 0.0;
        for s in &mut self.stats {
            s.reset();
        }
        self.calibrator.reset();
        if self.realtime {
            self.calibrator.start();
        }
        self.tracker.reset();
        self.ring.reset();
        self.total_samples = 0;
    }

    /// Switch fusion rule and emission latency. Enabling realtime mode
    /// starts a calibration phase.
    pub fn set_realtime_mode(&mut self, realtime: bool) {
        if realtime == self.realtime {
            return;
        }
        self.realtime = realtime;
        self.tracker.set_realtime(realtime);
        if realtime {
            self.calibrator.start();
            info!("realtime mode enabled, calibrating");
        } else {
            self.calibrator.stop();
        }
    }

    /// Restart the calibration phase with the current SNR margin.
    pub fn recalibrate(&mut self) {
        self.calibrator.start();
    }

    #[inline]
    pub fn is_calibrating(&self) -> bool {
        self.calibrator.is_calibrating()
    }

    /// Change the SNR margin. Finalized thresholds re-derive immediately.
    pub fn set_snr_threshold(&mut self, snr_db: f32) {
        self.calibrator.set_snr_db(snr_db);
    }

    /// Syllables silently evicted from a full context ring.
    #[inline]
    pub fn dropped_events(&self) -> u64 {
        self.ring.dropped()
    }

    /// Finalized syllables still waiting for trailing context.
    #[inline]
    pub fn pending_events(&self) -> usize {
        self.ring.pending()
    }

    /// Monotonic count of samples consumed.
    #[inline]
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    #[inline]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}
