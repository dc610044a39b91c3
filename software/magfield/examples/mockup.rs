//! A 10Hz field control run against a simulated coil.
//!
//! Demonstrated here:
//!   * Setting up a controller on injected ports instead of serial instruments
//!   * Retuning from operator text input while the loop runs
//!   * Watching run notifications
//!   * Exporting the retained history

use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use magfield::calc::OutputBounds;
use magfield::peripheral::mockup::MockupCoil;
use magfield::peripheral::{LineSensor, SupplyActuator};
use magfield::*;

fn main() {
    // Define idle controller
    let mut ctx = ControllerCtx::default();
    ctx.op_name = "mockup_example".into();
    ctx.op_dir = "./software/magfield/examples".into();
    ctx.output_bounds = OutputBounds::new(0.0, 5.0).unwrap();
    ctx.capacity = 50;

    // Simulated coil with a noisy telemetry line
    let coil = MockupCoil::default();
    let sensor = LineSensor::new(
        coil.sensor().with_noise_every(NonZeroUsize::new(7).unwrap()),
        ctx.sensor_timeout(),
    );
    let actuator = SupplyActuator::new(
        coil.supply(),
        ctx.channel,
        ctx.memory_slot,
        ctx.max_voltage,
        ctx.output_bounds,
    );
    let mut controller =
        FieldController::new(ctx, Box::new(sensor), Box::new(actuator)).unwrap();
    let events = controller.events();

    // Proportional-only at first, which leaves a steady-state error
    controller.start().unwrap();
    thread::sleep(Duration::from_secs(2));
    let readout = controller.latest().unwrap();
    println!(
        "P only:  {:.4} T at {:.3} A (setpoint {} T)",
        readout.field,
        readout.current,
        controller.setpoint()
    );

    // Add integral action and a new target, as an operator would type them
    let input = OperatorInput {
        kp: "2.0",
        ki: "5.0",
        kd: "0.0",
        setpoint: "1.5",
    };
    controller.apply_operator_input(&input).unwrap();
    thread::sleep(Duration::from_secs(3));
    let readout = controller.latest().unwrap();
    println!(
        "PI:      {:.4} T at {:.3} A (setpoint {} T)",
        readout.field,
        readout.current,
        controller.setpoint()
    );

    controller.stop();
    controller.wait_idle(Duration::from_secs(1));
    for event in events.try_iter() {
        println!("Event: {event:?}");
    }

    let path = controller.export_default().unwrap();
    println!(
        "Exported {} samples to {}",
        controller.history().len(),
        path.display()
    );
}
