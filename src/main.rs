use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use linux_embedded_hal::I2cdev;
use linux_embedded_hal::CdevPin;
use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
use tokio::time::interval;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mecanum_teleop::audio::{AudioBackend, GpioBuzzer, NullAudio};
use mecanum_teleop::config::{PWM_FREQ_HZ, Params};
use mecanum_teleop::control::condition_axes;
use mecanum_teleop::input::{GamepadSource, InputSource, KeyboardSource};
use mecanum_teleop::messages::ButtonEvent;
use mecanum_teleop::motor::driver::ActuatorGateway;
use mecanum_teleop::motor::kinematics::WheelCommand;
use mecanum_teleop::motor::pca9685::{Pca9685Chip, PwmChip, SimChip};
use mecanum_teleop::perception::{DetectionSource, JsonLineSource};
use mecanum_teleop::runtime::Runtime;

type Error = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "mecanum-teleop", about = "Teleop runtime for the 4WD mecanum base")]
struct Cli {
    /// JSON parameter file overriding the built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Drive the real PWM chip and buzzer instead of the simulation
    #[arg(long, global = true)]
    hardware: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the teleop runtime (default)
    Run {
        #[arg(long, value_enum, default_value_t = InputKind::Gamepad)]
        input: InputKind,

        /// Detection event stream: path to JSON lines, or '-' for stdin
        #[arg(long)]
        detections: Option<String>,
    },
    /// Drive each wheel briefly in turn (wheels off the ground!)
    MotorCheck,
    /// Echo conditioned axis values and button edges
    InputCheck {
        #[arg(long, value_enum, default_value_t = InputKind::Gamepad)]
        input: InputKind,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InputKind {
    Gamepad,
    Keyboard,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    if let Err(e) = run_cli().await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), Error> {
    let cli = Cli::parse();

    let params = match &cli.config {
        Some(path) => Params::load(path)?,
        None => Params::default(),
    };

    let command = cli.command.unwrap_or(Command::Run {
        input: InputKind::Gamepad,
        detections: None,
    });

    match command {
        Command::Run { input, detections } => {
            let input = build_input(input)?;
            let detections = build_detections(detections.as_deref())?;

            if cli.hardware {
                let gateway = hardware_gateway(&params)?;
                let audio = hardware_buzzer(&params)?;
                Runtime::new(gateway, input, audio, params)
                    .run(detections)
                    .await?;
            } else {
                info!("No --hardware flag: driving the simulated PWM chip");
                let gateway = ActuatorGateway::with_calibration(
                    SimChip::new(),
                    params.left_trim,
                    params.min_duty,
                );
                let audio: Box<dyn AudioBackend + Send> = Box::new(NullAudio::new());
                Runtime::new(gateway, input, audio, params)
                    .run(detections)
                    .await?;
            }
        }
        Command::MotorCheck => {
            if cli.hardware {
                if !confirm("Are the robot's wheels OFF THE GROUND?")? {
                    println!("Please elevate the robot so wheels can spin freely.");
                    return Ok(());
                }
                motor_check(hardware_gateway(&params)?).await?;
            } else {
                motor_check(ActuatorGateway::with_calibration(
                    SimChip::new(),
                    params.left_trim,
                    params.min_duty,
                ))
                .await?;
            }
        }
        Command::InputCheck { input } => {
            input_check(build_input(input)?, &params).await?;
        }
    }

    Ok(())
}

fn build_input(kind: InputKind) -> Result<Box<dyn InputSource + Send>, Error> {
    Ok(match kind {
        InputKind::Gamepad => Box::new(GamepadSource::new()?),
        InputKind::Keyboard => Box::new(KeyboardSource::new()?),
    })
}

fn build_detections(arg: Option<&str>) -> io::Result<Option<Box<dyn DetectionSource>>> {
    Ok(match arg {
        None => None,
        Some("-") => Some(Box::new(JsonLineSource::new(BufReader::new(io::stdin())))),
        Some(path) => {
            let file = File::open(path)?;
            Some(Box::new(JsonLineSource::new(BufReader::new(file))))
        }
    })
}

fn hardware_gateway(params: &Params) -> Result<ActuatorGateway<Pca9685Chip<I2cdev>>, Error> {
    info!("Opening PWM chip at 0x{:02X} on {}", params.pwm_address, params.i2c_bus);
    let i2c = I2cdev::new(&params.i2c_bus)?;
    let chip = Pca9685Chip::new(i2c, params.pwm_address, PWM_FREQ_HZ)?;
    Ok(ActuatorGateway::with_calibration(
        chip,
        params.left_trim,
        params.min_duty,
    ))
}

fn hardware_buzzer(params: &Params) -> Result<Box<dyn AudioBackend + Send>, Error> {
    let mut chip = Chip::new("/dev/gpiochip0")?;
    let handle = chip
        .get_line(params.buzzer_gpio)?
        .request(LineRequestFlags::OUTPUT, 0, "mecanum-teleop-buzzer")?;
    let pin = CdevPin::new(handle)?;
    Ok(Box::new(GpioBuzzer::new(pin)))
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Spin each wheel forward at a low duty, one at a time.
async fn motor_check<C: PwmChip + Send + 'static>(
    mut gateway: ActuatorGateway<C>,
) -> Result<(), Error> {
    const CHECK_DUTY: i16 = 1500;

    let wheels = [
        ("front-left", WheelCommand::new(CHECK_DUTY, 0, 0, 0)),
        ("front-right", WheelCommand::new(0, CHECK_DUTY, 0, 0)),
        ("back-left", WheelCommand::new(0, 0, CHECK_DUTY, 0)),
        ("back-right", WheelCommand::new(0, 0, 0, CHECK_DUTY)),
    ];

    for (name, cmd) in wheels {
        info!("Driving {} wheel at duty {}", name, CHECK_DUTY);
        gateway.set_motor_duties(&cmd)?;
        tokio::time::sleep(Duration::from_millis(700)).await;
        gateway.stop_motors()?;
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    gateway.release()?;
    info!("Motor check complete");
    Ok(())
}

/// Print conditioned axes whenever they change, and every button edge.
async fn input_check(
    mut input: Box<dyn InputSource + Send>,
    params: &Params,
) -> Result<(), Error> {
    info!("Input check: move sticks / press buttons, Quit button or Ctrl-C to exit");

    let mut tick = interval(Duration::from_millis(50));
    let mut last = None;

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }

        let frame = input.poll()?;
        let sample = condition_axes(frame.axes, params);
        if last != Some(sample) {
            info!(
                "axes: forward={:+.2} strafe={:+.2} turn={:+.2}",
                sample.forward, sample.strafe, sample.turn
            );
            last = Some(sample);
        }
        for event in &frame.events {
            info!("button: {:?}", event);
            if *event == ButtonEvent::Quit {
                return Ok(());
            }
        }
    }
}
