#[cfg(test)]
mod timing_tests {
    use std::{cell::RefCell, rc::Rc};

    use flopdrv::{
        clock::{Clock, ClockEvent},
        DriveGeometry, FloppyConfig, FloppyRegistry,
    };

    type EdgeLog = Rc<RefCell<Vec<(usize, u64, bool)>>>;

    fn registry_with_log(config: &FloppyConfig) -> (FloppyRegistry, EdgeLog) {
        let mut registry = FloppyRegistry::new(config).unwrap();
        let log: EdgeLog = Rc::new(RefCell::new(Vec::new()));
        let clock = registry.clock();

        for drive in registry.drives_mut() {
            let (log, clock) = (log.clone(), clock.clone());
            drive.set_index_pulse_callback(Box::new(move |id, level| {
                log.borrow_mut()
                    .push((id, clock.borrow().total_cycles(), level));
            }));
        }
        (registry, log)
    }

    #[test]
    fn test_revolution_timing() {
        let (mut registry, log) = registry_with_log(&FloppyConfig::uniform(1, DriveGeometry::DS_80));
        registry.drive_mut(0).unwrap().set_motor(true);

        // Advance exactly one revolution at 300 rpm
        registry.run_for(200_000);

        assert_eq!(*log.borrow(), vec![(0, 190_000, true), (0, 200_000, false)]);
        assert!(!registry.drive(0).unwrap().index_phase());
    }

    #[test]
    fn test_clock_rate_scales_timing() {
        let config = FloppyConfig {
            clock_hz: 4_000_000,
            ..FloppyConfig::uniform(1, DriveGeometry::DS_80)
        };
        let (mut registry, log) = registry_with_log(&config);
        registry.drive_mut(0).unwrap().set_motor(true);

        registry.run_for(800_000);
        assert_eq!(*log.borrow(), vec![(0, 760_000, true), (0, 800_000, false)]);
    }

    #[test]
    fn test_drives_interleave_by_time() {
        let mut config = FloppyConfig::uniform(2, DriveGeometry::DS_80);
        config.drives[1].rpm = 360.0;
        let (mut registry, log) = registry_with_log(&config);

        for drive in registry.drives_mut() {
            drive.set_motor(true);
        }
        registry.run_for(200_000);

        // 360 rpm: 166667 ticks per turn, 8333 high
        assert_eq!(
            *log.borrow(),
            vec![
                (1, 158_333, true),
                (1, 166_666, false),
                (0, 190_000, true),
                (0, 200_000, false),
            ]
        );
    }

    #[test]
    fn test_chunked_run_matches_single_run() {
        let config = FloppyConfig::uniform(2, DriveGeometry::SS_80);

        let (mut whole, whole_log) = registry_with_log(&config);
        let (mut chunked, chunked_log) = registry_with_log(&config);
        for registry in [&mut whole, &mut chunked] {
            registry.drive_mut(0).unwrap().set_motor(true);
        }

        whole.run_for(1_000_000);
        for _ in 0..1000 {
            chunked.run_for(1_000);
        }

        assert_eq!(*whole_log.borrow(), *chunked_log.borrow());
        assert_eq!(whole.now(), chunked.now());
    }

    #[test]
    fn test_motor_off_mid_pulse() {
        let (mut registry, log) = registry_with_log(&FloppyConfig::uniform(1, DriveGeometry::DS_80));
        registry.drive_mut(0).unwrap().set_motor(true);

        registry.run_for(195_000);
        assert!(registry.drive(0).unwrap().index_phase());

        registry.drive_mut(0).unwrap().set_motor(false);
        assert!(!registry.drive(0).unwrap().index_phase());
        registry.run_for(1_000_000);

        assert_eq!(log.borrow().len(), 1);
        assert_eq!(registry.clock().borrow().pending_events(), 0);
    }

    #[test]
    fn test_clock_reset_drops_events() {
        let mut clock = Clock::default();
        clock.schedule_in(10, ClockEvent::IndexPulse { drive: 0 });
        clock.tick(5);

        clock.reset();
        assert_eq!(clock.total_cycles(), 0);
        assert_eq!(clock.pending_events(), 0);
        assert!(clock.tick(100).is_empty());
    }
}
